// =============================================================================
// dispatch.rs - FROM "RUN PASTEBIN" TO A TRACKED TASK
// =============================================================================
//
// The dispatcher owns the table of available modules and the shared pieces
// every run needs (registry, emitter, limits). Launching a module spawns one
// tokio task that drives the module through the runner; several modules can
// be in flight at once, each owning its own registry key.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{ReactorError, Result};
use crate::models::Outcome;
use crate::modules::{self, CollectionModule};
use crate::registry::JobRegistry;
use crate::runner::{self, RunContext, RunLimits};
use crate::syslog::SyslogEmitter;

pub struct Dispatcher {
    ctx: RunContext,
    modules: BTreeMap<String, Arc<dyn CollectionModule>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<JobRegistry>, emitter: Arc<SyslogEmitter>, limits: RunLimits) -> Self {
        Self {
            ctx: RunContext {
                registry,
                emitter,
                limits,
            },
            modules: BTreeMap::new(),
        }
    }

    /// A dispatcher with every built-in module registered.
    pub fn from_config(
        config: &Config,
        registry: Arc<JobRegistry>,
        emitter: Arc<SyslogEmitter>,
    ) -> Result<Self> {
        let mut dispatcher = Self::new(registry, emitter, RunLimits::from_config(config));
        for name in modules::MODULE_NAMES {
            dispatcher.register(Arc::from(modules::build(name, config)?));
        }
        Ok(dispatcher)
    }

    pub fn register(&mut self, module: Arc<dyn CollectionModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.ctx.registry
    }

    fn module(&self, name: &str) -> Result<Arc<dyn CollectionModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ReactorError::JobNotFound(name.to_string()))
    }

    /// Spawn a run of `name` on the runtime and hand back its handle.
    pub fn launch(
        &self,
        name: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<Result<Outcome>>> {
        let module = self.module(name)?;
        let ctx = self.ctx.clone();
        info!(module = name, "dispatching module");
        Ok(tokio::spawn(async move {
            runner::run(module.as_ref(), &ctx, &mut shutdown).await
        }))
    }

    /// Run `name` to completion on the current task.
    pub async fn run(&self, name: &str, shutdown: &mut watch::Receiver<bool>) -> Result<Outcome> {
        let module = self.module(name)?;
        runner::run(module.as_ref(), &self.ctx, shutdown).await
    }

    /// Status dump for one job, or every job with `"all"`.
    pub fn get_stats(&self, query: &str) -> String {
        self.ctx.registry.get_stats(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CefEvent, Finding, JobStatus};
    use crate::modules::FetchPass;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    struct Fixed {
        name: &'static str,
        hits: usize,
    }

    #[async_trait]
    impl CollectionModule for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn load(&self) -> Result<Vec<String>> {
            Ok(vec!["input".to_string()])
        }

        async fn fetch(&self, _inputs: &[String], _work: Vec<String>) -> Result<FetchPass> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(FetchPass {
                findings: (0..self.hits)
                    .map(|i| Finding::new(format!("{}-{}", self.name, i), "hit"))
                    .collect(),
                ..FetchPass::default()
            })
        }

        fn to_event(&self, finding: &Finding) -> CefEvent {
            CefEvent::new(100, "Fixed", 1, finding)
        }
    }

    async fn dispatcher() -> (Dispatcher, UdpSocket) {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut dispatcher = Dispatcher::new(
            Arc::new(JobRegistry::new()),
            Arc::new(SyslogEmitter::new("127.0.0.1", port)),
            RunLimits {
                max_fetch_passes: 2,
                pass_delay: Duration::ZERO,
                max_events: 0,
            },
        );
        dispatcher.register(Arc::new(Fixed { name: "alpha", hits: 3 }));
        dispatcher.register(Arc::new(Fixed { name: "beta", hits: 2 }));
        (dispatcher, listener)
    }

    #[tokio::test]
    async fn test_concurrent_launches_track_separate_jobs() {
        let (dispatcher, listener) = dispatcher().await;
        let (_tx, rx) = watch::channel(false);

        let a = dispatcher.launch("alpha", rx.clone()).unwrap();
        let b = dispatcher.launch("beta", rx.clone()).unwrap();
        assert_eq!(a.await.unwrap().unwrap(), Outcome::Success);
        assert_eq!(b.await.unwrap().unwrap(), Outcome::Success);

        let registry = dispatcher.registry();
        assert_eq!(registry.get("alpha").unwrap().events, 3);
        assert_eq!(registry.get("beta").unwrap().events, 2);
        assert_eq!(
            registry.get("beta").unwrap().status,
            JobStatus::Finished(Outcome::Success)
        );

        let mut buf = [0u8; 1024];
        let mut received = 0;
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(300), listener.recv_from(&mut buf)).await
        {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn test_unknown_module_is_rejected() {
        let (dispatcher, _listener) = dispatcher().await;
        let (_tx, mut rx) = watch::channel(false);
        assert!(matches!(
            dispatcher.launch("reddit", rx.clone()),
            Err(ReactorError::JobNotFound(_))
        ));
        assert!(matches!(
            dispatcher.run("reddit", &mut rx).await,
            Err(ReactorError::JobNotFound(_))
        ));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_get_stats_after_run() {
        let (dispatcher, _listener) = dispatcher().await;
        let (_tx, mut rx) = watch::channel(false);
        assert_eq!(dispatcher.get_stats("all"), "no running jobs");

        dispatcher.run("alpha", &mut rx).await.unwrap();

        let stats = dispatcher.get_stats("alpha");
        assert!(stats.contains("status:  \tfinished\n"));
        assert!(stats.contains("message: \tfinished successfully\n"));
        assert!(stats.contains("events:  \t3\n"));
        assert_eq!(dispatcher.get_stats("beta"), "cannot find job beta");
        assert_eq!(dispatcher.module_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_built_in_modules_register_from_config() {
        let config = Config::for_siem("127.0.0.1", 5141);
        let dispatcher = Dispatcher::from_config(
            &config,
            Arc::new(JobRegistry::new()),
            Arc::new(SyslogEmitter::new("127.0.0.1", 5141)),
        )
        .unwrap();
        assert_eq!(dispatcher.module_names(), vec!["knownbad", "otx", "pastebin"]);
    }
}
