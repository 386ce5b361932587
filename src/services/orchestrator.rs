use super::readiness;
use crate::domain::{
    ContainerRuntime, Environment, EnvironmentRequirement, ProvisioningError, RunningService,
    ServiceSpec, SessionConfig, TeardownError,
};
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// `false` when every required variable is already set, meaning the services
/// are managed elsewhere.
pub fn should_provision(requirement: &EnvironmentRequirement, environment: &Environment) -> bool {
    !requirement.is_satisfied_by(environment)
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Wait applied once after every service has started and passed its probe
    pub settle_delay: Duration,
    /// Force-remove a same-named, labelled container left over by an earlier
    /// session
    pub replace_stale: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            replace_stale: true,
        }
    }
}

/// Starts declared services for one session and hands back their coordinates
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    options: OrchestratorOptions,
    interrupt: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: OrchestratorOptions) -> Self {
        Self {
            runtime,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops provisioning at the next start, probe attempt or settle slice
    /// once `flag` is raised.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Opens an empty session bound to this orchestrator's runtime
    pub fn session(&self) -> OrchestratorSession {
        OrchestratorSession::new(self.runtime.clone())
    }

    /// Starts every spec in order, appending each handle to `session` as soon
    /// as its container is up. On failure the handles started so far stay in
    /// the session so they are still torn down.
    pub fn provision(
        &self,
        session: &mut OrchestratorSession,
        specs: &[ServiceSpec],
    ) -> Result<SessionConfig, ProvisioningError> {
        if specs.is_empty() {
            debug!("No services declared, nothing to provision");
            return Ok(SessionConfig::provisioned(BTreeMap::new()));
        }

        info!("Provisioning {} service(s)...", specs.len());

        for spec in specs {
            if self.interrupted() {
                return Err(ProvisioningError::Interrupted {
                    service: spec.name().to_string(),
                });
            }

            if self.options.replace_stale {
                self.remove_stale(spec)?;
            }

            let id = self
                .runtime
                .run_container(&spec.to_spec())
                .map_err(|source| ProvisioningError::Start {
                    service: spec.name().to_string(),
                    image: spec.image().to_string(),
                    source,
                })?;

            let handle = RunningService::new(spec.name(), id);
            info!(
                "Started '{}' from {} ({})",
                spec.name(),
                spec.image(),
                handle.short_id()
            );
            session.push(handle);
        }

        for spec in specs {
            readiness::wait_until_ready(self.runtime.as_ref(), spec, &self.interrupt)?;
        }

        if !readiness::settle(self.options.settle_delay, &self.interrupt) {
            let last = specs.last().map(ServiceSpec::name).unwrap_or_default();
            return Err(ProvisioningError::Interrupted {
                service: last.to_string(),
            });
        }

        let exports = declared_exports(specs)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        info!("All {} service(s) started", specs.len());

        Ok(SessionConfig::provisioned(exports))
    }

    fn remove_stale(&self, spec: &ServiceSpec) -> Result<(), ProvisioningError> {
        let name = spec.name();

        match self.runtime.container_exists(name) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => {
                debug!("Could not inspect '{}': {:#}", name, e);
                return Ok(());
            }
        }

        let managed = self
            .runtime
            .is_managed(name)
            .map_err(|source| ProvisioningError::Stale {
                service: name.to_string(),
                source,
            })?;

        if !managed {
            return Err(ProvisioningError::NameTaken {
                service: name.to_string(),
            });
        }

        warn!("Container '{}' left by an earlier session, replacing it", name);
        self.runtime
            .remove_container(name)
            .map_err(|source| ProvisioningError::Stale {
                service: name.to_string(),
                source,
            })
    }

    /// Runs one full session around `workload`.
    ///
    /// When `environment` already satisfies `requirement` nothing is started
    /// and the workload sees the existing coordinates. Otherwise the services
    /// are provisioned first and torn down afterwards, whatever the outcome.
    pub fn run_session<T, F>(
        &self,
        requirement: &EnvironmentRequirement,
        environment: &Environment,
        specs: &[ServiceSpec],
        workload: F,
    ) -> Result<T>
    where
        F: FnOnce(&SessionConfig) -> Result<T>,
    {
        if !should_provision(requirement, environment) {
            info!("Environment is already running, skipping provisioning");
            let config =
                SessionConfig::external(requirement, environment, declared_exports(specs));
            return workload(&config);
        }

        debug!("Missing variables: {:?}", requirement.missing(environment));

        let mut session = self.session();
        let config = self.provision(&mut session, specs)?;

        let produced: Environment = config.iter().collect();
        let missing = requirement.missing(&produced);
        if !missing.is_empty() {
            bail!("provisioned services do not export {}", missing.join(", "));
        }

        if self.interrupted() {
            bail!("interrupted before the workload started");
        }

        let result = workload(&config);
        session.teardown();

        result
    }
}

/// Exports of every spec in declaration order; a later spec wins a name
/// clash once collected.
fn declared_exports(specs: &[ServiceSpec]) -> impl Iterator<Item = (&str, &str)> {
    specs
        .iter()
        .flat_map(|spec| spec.exports().iter())
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Handles accumulated while provisioning one session.
///
/// Dropping the session tears it down, so handles are released on early
/// return and on panic as well.
#[derive(Debug)]
pub struct OrchestratorSession {
    runtime: Arc<dyn ContainerRuntime>,
    handles: Vec<RunningService>,
}

impl OrchestratorSession {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            handles: Vec::new(),
        }
    }

    pub fn handles(&self) -> &[RunningService] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn push(&mut self, handle: RunningService) {
        self.handles.push(handle);
    }

    /// Force-removes every handle by container id, newest first. Each failure is logged and
    /// returned; none stops the remaining removals. Handles are consumed, so
    /// calling this again does nothing.
    pub fn teardown(&mut self) -> Vec<TeardownError> {
        if self.handles.is_empty() {
            return Vec::new();
        }

        info!("Tearing down {} service(s)...", self.handles.len());

        let mut failures = Vec::new();

        for handle in self.handles.drain(..).rev() {
            match self.runtime.remove_container(handle.container_id()) {
                Ok(()) => debug!("Removed '{}' ({})", handle.name(), handle.short_id()),
                Err(source) => {
                    warn!("Failed to stop '{}': {:#}", handle.name(), source);
                    failures.push(TeardownError {
                        service: handle.name().to_string(),
                        source,
                    });
                }
            }
        }

        failures
    }
}

impl Drop for OrchestratorSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PortMapping, ReadinessProbe, VolumeMount};
    use crate::test_support::MockRuntime;

    fn create_test_orchestrator() -> (Orchestrator, Arc<MockRuntime>) {
        let mock = Arc::new(MockRuntime::new());
        let options = OrchestratorOptions {
            settle_delay: Duration::ZERO,
            replace_stale: true,
        };
        (Orchestrator::new(mock.clone(), options), mock)
    }

    fn influx() -> ServiceSpec {
        ServiceSpec::new("influx-tests", "influxdb:1.7-alpine")
            .with_port(PortMapping::tcp(8090, 8086))
            .with_export("INFLUXDB_HTTP_ADDR", "localhost")
            .with_export("INFLUXDB_HTTP_PORT", "8090")
    }

    fn minio() -> ServiceSpec {
        ServiceSpec::new("minio-tests", "minio/minio:latest")
            .with_port(PortMapping::tcp(9001, 9000))
            .with_env("MINIO_ACCESS_KEY", "access_key")
            .with_volume(VolumeMount::new("/srv/files", "/data"))
            .with_command(["server", "/data"])
            .with_export("MINIO_HTTP_ADDR", "localhost:9001")
    }

    fn requirement() -> EnvironmentRequirement {
        EnvironmentRequirement::new(["ADDR", "PORT", "USER", "PASS"]).unwrap()
    }

    fn exported() -> EnvironmentRequirement {
        EnvironmentRequirement::new(["INFLUXDB_HTTP_ADDR", "MINIO_HTTP_ADDR"]).unwrap()
    }

    #[test]
    fn should_provision_is_subset_check() {
        let full: Environment = [("ADDR", "a"), ("PORT", "1"), ("USER", "u"), ("PASS", "p")]
            .into_iter()
            .collect();
        let partial: Environment = [("ADDR", "a"), ("PORT", "1")].into_iter().collect();

        assert!(!should_provision(&requirement(), &full));
        assert!(should_provision(&requirement(), &partial));
        assert!(should_provision(&requirement(), &Environment::default()));
    }

    #[test]
    fn provisions_in_declared_order() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();

        let config = orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap();

        let names: Vec<_> = session.handles().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["influx-tests", "minio-tests"]);

        let runs: Vec<_> = mock
            .get_commands()
            .into_iter()
            .filter(|c| c.starts_with("run:"))
            .collect();
        assert_eq!(runs, vec!["run:influx-tests", "run:minio-tests"]);

        assert!(config.is_provisioned());
        assert_eq!(config.get("INFLUXDB_HTTP_PORT"), Some("8090"));
        assert_eq!(config.get("MINIO_HTTP_ADDR"), Some("localhost:9001"));
    }

    #[test]
    fn applies_spec_exactly_as_declared() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();

        orchestrator.provision(&mut session, &[minio()]).unwrap();

        let spec = mock.get_spec("minio-tests").unwrap();
        assert_eq!(spec.image, "minio/minio:latest");
        assert_eq!(spec.ports, vec!["9001:9000"]);
        assert_eq!(spec.env, vec!["MINIO_ACCESS_KEY=access_key"]);
        assert_eq!(spec.volumes, vec!["/srv/files:/data:rw"]);
        assert_eq!(spec.command, vec!["server", "/data"]);
        assert!(spec.auto_remove);
    }

    #[test]
    fn empty_spec_list_starts_nothing() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();

        let config = orchestrator.provision(&mut session, &[]).unwrap();

        assert!(session.is_empty());
        assert!(config.is_empty());
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn failure_keeps_earlier_handles() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.set_fail_on("run:minio-tests");

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Start { .. }));
        assert_eq!(err.service(), "minio-tests");
        assert_eq!(session.len(), 1);
        assert_eq!(session.handles()[0].name(), "influx-tests");

        let failures = session.teardown();
        assert!(failures.is_empty());
        assert_eq!(mock.count("remove:influx-tests"), 1);
        assert_eq!(mock.count("remove:minio-tests"), 0);
        assert!(!mock.container_exists("influx-tests"));
    }

    #[test]
    fn first_service_failure_leaves_session_empty() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.set_fail_on("run:influx-tests");

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap_err();

        assert_eq!(err.service(), "influx-tests");
        assert!(session.is_empty());
        assert_eq!(mock.count("run:minio-tests"), 0);
    }

    #[test]
    fn readiness_failure_keeps_all_handles() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.set_ready_after("minio-tests", 10);

        let probe = ReadinessProbe::command(["mc", "ready", "local"])
            .with_retries(2)
            .with_interval(Duration::from_millis(5));

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx(), minio().with_readiness(probe)])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::NotReady { attempts: 2, .. }));
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn replaces_stale_container() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.add_stale_container("influx-tests");

        let mut session = orchestrator.session();
        orchestrator.provision(&mut session, &[influx()]).unwrap();

        let commands = mock.get_commands();
        let remove = commands.iter().position(|c| c == "remove:influx-tests");
        let run = commands.iter().position(|c| c == "run:influx-tests");
        assert!(remove.unwrap() < run.unwrap());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn leaves_unlabelled_container_alone() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.add_container("influx-tests");

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx()])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::NameTaken { ref service } if service == "influx-tests"));
        assert!(session.is_empty());
        assert!(mock.container_exists("influx-tests"));
        assert_eq!(mock.count("remove:influx-tests"), 0);
        assert_eq!(mock.count("run:influx-tests"), 0);
    }

    #[test]
    fn started_containers_are_labelled() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();

        orchestrator.provision(&mut session, &[influx()]).unwrap();

        assert!(mock.get_spec("influx-tests").unwrap().managed);
    }

    #[test]
    fn stale_container_fails_when_replacement_disabled() {
        let mock = Arc::new(MockRuntime::new());
        let orchestrator = Orchestrator::new(
            mock.clone(),
            OrchestratorOptions {
                settle_delay: Duration::ZERO,
                replace_stale: false,
            },
        );
        mock.add_stale_container("influx-tests");

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx()])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Start { .. }));
        assert!(session.is_empty());
        assert_eq!(mock.count("exists:influx-tests"), 0);
    }

    #[test]
    fn stale_removal_failure_is_reported() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.add_stale_container("influx-tests");
        mock.set_fail_on("remove:influx-tests");

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx()])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Stale { .. }));
    }

    #[test]
    fn teardown_continues_on_failure() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();
        orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap();

        mock.set_fail_on("remove:minio-tests");

        let failures = session.teardown();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "minio-tests");
        assert_eq!(mock.count("remove:influx-tests"), 1);
        assert!(session.is_empty());
    }

    #[test]
    fn teardown_removes_newest_first() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();
        orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap();

        session.teardown();

        let removes: Vec<_> = mock
            .get_commands()
            .into_iter()
            .filter(|c| c.starts_with("remove:"))
            .collect();
        assert_eq!(removes, vec!["remove:minio-tests", "remove:influx-tests"]);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();
        orchestrator.provision(&mut session, &[influx()]).unwrap();

        assert!(session.teardown().is_empty());
        assert!(session.teardown().is_empty());
        drop(session);

        assert_eq!(mock.count("remove:influx-tests"), 1);
    }

    #[test]
    fn teardown_targets_the_container_it_started() {
        let (orchestrator, mock) = create_test_orchestrator();
        let mut session = orchestrator.session();
        orchestrator.provision(&mut session, &[influx()]).unwrap();

        // Ours exits and is auto-removed, then an unrelated container takes the name.
        mock.simulate_exit("influx-tests");
        mock.add_container("influx-tests");

        let failures = session.teardown();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "influx-tests");
        assert!(mock.container_exists("influx-tests"));
        assert_eq!(
            mock.container_id("influx-tests").as_deref(),
            Some("preexisting-influx-tests")
        );
    }

    #[test]
    fn dropping_session_tears_down() {
        let (orchestrator, mock) = create_test_orchestrator();
        {
            let mut session = orchestrator.session();
            orchestrator.provision(&mut session, &[influx()]).unwrap();
        }

        assert_eq!(mock.count("remove:influx-tests"), 1);
    }

    #[test]
    fn run_session_skips_when_environment_is_set() {
        let (orchestrator, mock) = create_test_orchestrator();
        let env: Environment = [
            ("INFLUXDB_HTTP_ADDR", "influx.ci"),
            ("MINIO_HTTP_ADDR", "minio.ci:9000"),
        ]
        .into_iter()
        .collect();

        let seen = orchestrator
            .run_session(&exported(), &env, &[influx(), minio()], |config| {
                assert!(!config.is_provisioned());
                Ok(config.get("INFLUXDB_HTTP_ADDR").map(str::to_string))
            })
            .unwrap();

        assert_eq!(seen.as_deref(), Some("influx.ci"));
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn run_session_config_has_same_names_either_way() {
        let names = |config: &SessionConfig| -> Vec<String> {
            config.iter().map(|(k, _)| k.to_string()).collect()
        };
        let env: Environment = [
            ("INFLUXDB_HTTP_ADDR", "influx.ci"),
            ("MINIO_HTTP_ADDR", "minio.ci:9000"),
        ]
        .into_iter()
        .collect();

        let (orchestrator, _mock) = create_test_orchestrator();
        let external = orchestrator
            .run_session(&exported(), &env, &[influx(), minio()], |config| {
                Ok(names(config))
            })
            .unwrap();
        let provisioned = orchestrator
            .run_session(
                &exported(),
                &Environment::default(),
                &[influx(), minio()],
                |config| Ok(names(config)),
            )
            .unwrap();

        assert_eq!(external, provisioned);
        assert_eq!(
            provisioned,
            vec!["INFLUXDB_HTTP_ADDR", "INFLUXDB_HTTP_PORT", "MINIO_HTTP_ADDR"]
        );
    }

    #[test]
    fn run_session_rejects_requirement_services_do_not_export() {
        let (orchestrator, mock) = create_test_orchestrator();

        let mut ran = false;
        let result = orchestrator.run_session(
            &requirement(),
            &Environment::default(),
            &[influx()],
            |_| {
                ran = true;
                Ok(())
            },
        );

        let err = result.unwrap_err();
        assert!(err.to_string().contains("do not export"));
        assert!(!ran);
        assert_eq!(mock.count("remove:influx-tests"), 1);
    }

    #[test]
    fn raised_interrupt_starts_nothing() {
        let (orchestrator, mock) = create_test_orchestrator();
        let orchestrator = orchestrator.with_interrupt(Arc::new(AtomicBool::new(true)));

        let mut session = orchestrator.session();
        let err = orchestrator
            .provision(&mut session, &[influx(), minio()])
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Interrupted { ref service } if service == "influx-tests"));
        assert!(session.is_empty());
        assert_eq!(mock.count("run:influx-tests"), 0);
    }

    #[test]
    fn interrupt_during_settle_skips_workload_and_tears_down() {
        let mock = Arc::new(MockRuntime::new());
        let interrupt = Arc::new(AtomicBool::new(false));
        let orchestrator = Orchestrator::new(
            mock.clone(),
            OrchestratorOptions {
                settle_delay: Duration::from_secs(30),
                replace_stale: true,
            },
        )
        .with_interrupt(Arc::clone(&interrupt));

        let raiser = {
            let interrupt = Arc::clone(&interrupt);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                interrupt.store(true, Ordering::SeqCst);
            })
        };

        let start = std::time::Instant::now();
        let mut ran = false;
        let result = orchestrator.run_session(
            &exported(),
            &Environment::default(),
            &[influx(), minio()],
            |_| {
                ran = true;
                Ok(())
            },
        );
        raiser.join().unwrap();

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisioningError>(),
            Some(ProvisioningError::Interrupted { .. })
        ));
        assert!(!ran);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(mock.count("remove:influx-tests"), 1);
        assert_eq!(mock.count("remove:minio-tests"), 1);
    }

    #[test]
    fn run_session_tears_down_after_workload_error() {
        let (orchestrator, mock) = create_test_orchestrator();

        let result: Result<()> = orchestrator.run_session(
            &exported(),
            &Environment::default(),
            &[influx(), minio()],
            |config| {
                assert!(config.is_provisioned());
                anyhow::bail!("workload failed")
            },
        );

        assert!(result.is_err());
        assert_eq!(mock.count("remove:influx-tests"), 1);
        assert_eq!(mock.count("remove:minio-tests"), 1);
    }

    #[test]
    fn run_session_does_not_run_workload_after_provisioning_error() {
        let (orchestrator, mock) = create_test_orchestrator();
        mock.set_fail_on("run:minio-tests");

        let mut ran = false;
        let result = orchestrator.run_session(
            &exported(),
            &Environment::default(),
            &[influx(), minio()],
            |_| {
                ran = true;
                Ok(())
            },
        );

        let err = result.unwrap_err();
        let provisioning = err.downcast_ref::<ProvisioningError>().unwrap();
        assert_eq!(provisioning.service(), "minio-tests");
        assert!(!ran);
        assert_eq!(mock.count("remove:influx-tests"), 1);
    }
}
