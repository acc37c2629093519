//! Two-level request routing: Host header first, then path regex.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use regex::Regex;
use tracing::debug;

use portico_cache::CacheRegistry;
use portico_config::{HandlerKind, ServerBlock};
use portico_http::Handler;
use portico_proxy::{HttpSocketHandler, UnixSocketHandler};
use portico_static::{compile_error_rules, FsHandler};

/// One compiled routing rule.
struct PathRule {
    pattern: Regex,
    handler: Arc<dyn Handler>,
}

/// Immutable routing table, compiled once from the configured blocks.
pub struct Router {
    hosts: HashMap<String, Arc<Vec<PathRule>>>,
    default_rules: Arc<Vec<PathRule>>,
}

impl Router {
    /// Compile every block's rules and register them under each of the
    /// block's hosts. The block flagged as default (or the first block)
    /// becomes the fallback for unknown hosts. Invalid patterns and invalid
    /// cache configurations are fatal here.
    pub fn build(blocks: &[ServerBlock]) -> anyhow::Result<Self> {
        if blocks.is_empty() {
            anyhow::bail!("configuration contains no server blocks");
        }

        let registry = CacheRegistry::new();
        let mut hosts: HashMap<String, Arc<Vec<PathRule>>> = HashMap::new();
        let mut block_rules: Vec<Arc<Vec<PathRule>>> = Vec::new();
        let mut default_index = 0usize;

        for (index, block) in blocks.iter().enumerate() {
            if block.default {
                default_index = index;
            }

            let mut rules = Vec::new();
            for resource in &block.content {
                let resource = Arc::new(resource.clone());
                let error_rules = compile_error_rules(&resource)?;

                let handler: Arc<dyn Handler> = match resource.kind {
                    HandlerKind::FileSystem => Arc::new(
                        FsHandler::new(resource.clone(), error_rules, &registry).with_context(
                            || format!("invalid cache config for rule '{}'", resource.pattern),
                        )?,
                    ),
                    HandlerKind::HttpSocket => {
                        Arc::new(HttpSocketHandler::new(resource.clone(), error_rules)?)
                    }
                    HandlerKind::UnixSocket => Arc::new(UnixSocketHandler),
                };

                let pattern = Regex::new(&resource.pattern)
                    .with_context(|| format!("invalid path pattern '{}'", resource.pattern))?;
                rules.push(PathRule { pattern, handler });
            }

            let rules = Arc::new(rules);
            for host in &block.hosts {
                hosts.insert(host.host.clone(), rules.clone());
            }
            block_rules.push(rules);
        }

        let default_block = &blocks[default_index];
        if default_block.hosts.is_empty() {
            anyhow::bail!("default server block has no hosts");
        }
        let default_rules = block_rules[default_index].clone();

        Ok(Self {
            hosts,
            default_rules,
        })
    }

    /// Select the handler for a request. The `:port` suffix of the Host
    /// header is ignored; an unknown host falls back to the default block;
    /// the first rule whose regex matches the path wins. `None` means 404.
    pub fn route(&self, host: &str, path: &str) -> Option<Arc<dyn Handler>> {
        let host = host.split(':').next().unwrap_or(host);
        let rules = self.hosts.get(host).unwrap_or(&self.default_rules);

        let rule = rules.iter().find(|rule| rule.pattern.is_match(path))?;
        debug!(
            target: "portico::router",
            %host,
            %path,
            pattern = %rule.pattern,
            "Matched routing rule"
        );
        Some(rule.handler.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_config::{
        CacheStrategy, FileSystemDefaults, Host, ServerResource,
    };
    use tokio::io::AsyncReadExt;

    fn test_root(tag: &str, files: &[(&str, &str)]) -> String {
        let dir = std::env::temp_dir().join(format!("portico-router-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
        dir.to_string_lossy().into_owned()
    }

    fn host(name: &str, port: u16) -> Host {
        Host {
            host: name.to_string(),
            port,
            cert_file: None,
            key_file: None,
        }
    }

    fn fs_resource(pattern: &str, root: &str, cache: CacheStrategy) -> ServerResource {
        ServerResource {
            pattern: pattern.to_string(),
            kind: HandlerKind::FileSystem,
            path: root.to_string(),
            compression: false,
            fs_defaults: FileSystemDefaults::default(),
            cache,
            error_pages: Vec::new(),
        }
    }

    fn block(hosts: Vec<Host>, content: Vec<ServerResource>, default: bool) -> ServerBlock {
        ServerBlock {
            hosts,
            content,
            default,
        }
    }

    async fn body_via(handler: Arc<dyn Handler>, path: &str) -> Vec<u8> {
        let req = portico_http::Request {
            method: "GET".to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: format!("GET {path} HTTP/1.1\r\nHost: test\r\n"),
            body: Vec::new(),
            close_after: false,
        };
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        handler.handle(&mut server, &req).await.unwrap();
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let pos = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        out[pos + 4..].to_vec()
    }

    #[test]
    fn empty_configuration_is_rejected() {
        assert!(Router::build(&[]).is_err());
    }

    #[test]
    fn invalid_path_pattern_is_fatal() {
        let root = test_root("badpattern", &[]);
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![fs_resource("/[", &root, CacheStrategy::default())],
            true,
        )];
        assert!(Router::build(&blocks).is_err());
    }

    #[test]
    fn invalid_cache_config_is_fatal() {
        let root = test_root("badcache", &[]);
        let zero_limit = CacheStrategy {
            name: String::new(),
            strategy: "lru".to_string(),
            limit: 0,
        };
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![fs_resource("/", &root, zero_limit)],
            true,
        )];
        assert!(Router::build(&blocks).is_err());

        let unknown = CacheStrategy {
            name: String::new(),
            strategy: "fifo".to_string(),
            limit: 64,
        };
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![fs_resource("/", &root, unknown)],
            true,
        )];
        assert!(Router::build(&blocks).is_err());
    }

    #[test]
    fn default_block_without_hosts_is_fatal() {
        let root = test_root("nohosts", &[]);
        let blocks = vec![block(
            vec![],
            vec![fs_resource("/", &root, CacheStrategy::default())],
            true,
        )];
        assert!(Router::build(&blocks).is_err());
    }

    #[tokio::test]
    async fn routes_by_host_and_strips_port() {
        let root_a = test_root("host-a", &[("who.txt", "block-a")]);
        let root_b = test_root("host-b", &[("who.txt", "block-b")]);
        let blocks = vec![
            block(
                vec![host("a.test", 80)],
                vec![fs_resource("/", &root_a, CacheStrategy::default())],
                true,
            ),
            block(
                vec![host("b.test", 80)],
                vec![fs_resource("/", &root_b, CacheStrategy::default())],
                false,
            ),
        ];
        let router = Router::build(&blocks).unwrap();

        let handler = router.route("b.test", "/who.txt").expect("should match");
        assert_eq!(body_via(handler, "/who.txt").await, b"block-b");

        let handler = router.route("b.test:8080", "/who.txt").expect("should match");
        assert_eq!(body_via(handler, "/who.txt").await, b"block-b");
    }

    #[tokio::test]
    async fn unknown_host_uses_default_block() {
        let root_a = test_root("def-a", &[("who.txt", "block-a")]);
        let root_b = test_root("def-b", &[("who.txt", "block-b")]);
        let blocks = vec![
            block(
                vec![host("a.test", 80)],
                vec![fs_resource("/", &root_a, CacheStrategy::default())],
                false,
            ),
            block(
                vec![host("b.test", 80)],
                vec![fs_resource("/", &root_b, CacheStrategy::default())],
                true,
            ),
        ];
        let router = Router::build(&blocks).unwrap();

        let handler = router.route("nowhere.test", "/who.txt").expect("default");
        assert_eq!(body_via(handler, "/who.txt").await, b"block-b");
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let root_one = test_root("order-1", &[("who.txt", "rule-one")]);
        let root_two = test_root("order-2", &[("who.txt", "rule-two")]);
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![
                fs_resource("^/who", &root_one, CacheStrategy::default()),
                fs_resource(".*", &root_two, CacheStrategy::default()),
            ],
            true,
        )];
        let router = Router::build(&blocks).unwrap();

        let handler = router.route("a.test", "/who.txt").expect("should match");
        assert_eq!(body_via(handler, "/who.txt").await, b"rule-one");

        let handler = router.route("a.test", "/other.txt").expect("should match");
        assert_eq!(body_via(handler, "/who.txt").await, b"rule-two");
    }

    #[test]
    fn unmatched_path_returns_none() {
        let root = test_root("nomatch", &[]);
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![fs_resource("^/files/", &root, CacheStrategy::default())],
            true,
        )];
        let router = Router::build(&blocks).unwrap();
        assert!(router.route("a.test", "/elsewhere").is_none());
    }

    #[tokio::test]
    async fn named_cache_is_shared_across_rules() {
        // Rule B's root does not contain the file, but the shared cache is
        // keyed by request path, so rule A's cached read satisfies rule B.
        let root_a = test_root("share-a", &[("page.txt", "from-a")]);
        let root_b = test_root("share-b", &[]);
        let shared = CacheStrategy {
            name: "shared".to_string(),
            strategy: "lru".to_string(),
            limit: 1024,
        };
        let blocks = vec![block(
            vec![host("a.test", 80)],
            vec![
                fs_resource("^/a/page.txt$", &root_a, shared.clone()),
                fs_resource(".*", &root_b, shared.clone()),
            ],
            true,
        )];
        let router = Router::build(&blocks).unwrap();

        // Rule A's root nests the file under the request path prefix.
        std::fs::create_dir_all(format!("{root_a}/a")).unwrap();
        std::fs::write(format!("{root_a}/a/page.txt"), "from-a").unwrap();

        let a = router.route("a.test", "/a/page.txt").expect("rule a");
        assert_eq!(body_via(a, "/a/page.txt").await, b"from-a");

        let b = router.route("a.test", "/b-misses").expect("rule b");
        assert_eq!(body_via(b, "/a/page.txt").await, b"from-a");
    }
}
