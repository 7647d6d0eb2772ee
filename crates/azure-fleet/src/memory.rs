//! In-memory fleet for tests
//!
//! Implements every collaborator trait over a scripted set of VMs. It records
//! each remote dispatch, tracks how many dispatches overlap, and can be told to
//! fail, panic, or lag at specific points for specific VMs.

use crate::{
    Error, Inventory, LicenseMetadata, RemoteExecutor, RemoteOutput, RemoteScript, Result,
    ScriptPurpose, SecretStore, VmRecord,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Where a scripted failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Reading the license type
    LicenseRead,
    /// Dispatching a conversion script
    Dispatch,
    /// Writing the license type
    LicenseUpdate,
    /// Dispatching a read-only probe
    Probe,
}

#[derive(Debug, Clone)]
struct FakeVm {
    record: VmRecord,
    license: String,
    failures: Vec<FailurePoint>,
    panic_on_dispatch: bool,
    lag_license_update: bool,
    probe_output: String,
}

#[derive(Debug, Default)]
struct State {
    vms: Vec<FakeVm>,
    secrets: HashMap<(String, String), String>,
    dispatched: Vec<(String, RemoteScript)>,
    unauthenticated: bool,
}

/// Scripted fleet implementing all collaborator traits
#[derive(Debug, Default)]
pub struct InMemoryFleet {
    state: Mutex<State>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatch_delay: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryFleet {
    /// Empty fleet
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a VM with an image marker and a current license type
    pub fn with_vm(self, name: &str, image_marker: &str, license: &str) -> Self {
        self.lock().vms.push(FakeVm {
            record: VmRecord::new(name, image_marker),
            license: license.to_string(),
            failures: Vec::new(),
            panic_on_dispatch: false,
            lag_license_update: false,
            probe_output: String::new(),
        });
        self
    }

    /// Store a secret
    pub fn with_secret(self, store: &str, name: &str, value: &str) -> Self {
        self.lock()
            .secrets
            .insert((store.to_string(), name.to_string()), value.to_string());
        self
    }

    /// Make every dispatch take at least `delay`
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Fail the given step for `name`
    pub fn failing_at(self, name: &str, point: FailurePoint) -> Self {
        self.update_vm(name, |vm| vm.failures.push(point));
        self
    }

    /// Panic inside the conversion dispatch for `name`
    pub fn panicking_on_dispatch(self, name: &str) -> Self {
        self.update_vm(name, |vm| vm.panic_on_dispatch = true);
        self
    }

    /// Accept license updates for `name` without ever reflecting them
    pub fn lagging_license_update(self, name: &str) -> Self {
        self.update_vm(name, |vm| vm.lag_license_update = true);
        self
    }

    /// Output returned by probe scripts for `name`
    pub fn with_probe_output(self, name: &str, output: &str) -> Self {
        self.update_vm(name, |vm| vm.probe_output = output.to_string());
        self
    }

    /// Reject authentication checks
    pub fn unauthenticated(self) -> Self {
        self.lock().unauthenticated = true;
        self
    }

    /// Total number of collaborator calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of scripts with `purpose` dispatched to `name`
    pub fn dispatches_for(&self, name: &str, purpose: ScriptPurpose) -> usize {
        self.scripts_for(name, purpose).len()
    }

    /// Scripts with `purpose` dispatched to `name`, in dispatch order
    pub fn scripts_for(&self, name: &str, purpose: ScriptPurpose) -> Vec<RemoteScript> {
        self.lock()
            .dispatched
            .iter()
            .filter(|(vm, s)| vm == name && s.purpose == purpose)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Current license type of `name`
    pub fn license_of(&self, name: &str) -> Option<String> {
        self.lock()
            .vms
            .iter()
            .find(|vm| vm.record.name == name)
            .map(|vm| vm.license.clone())
    }

    /// Highest number of dispatches observed running at once
    pub fn peak_concurrent_dispatches(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_vm(&self, name: &str, f: impl FnOnce(&mut FakeVm)) {
        if let Some(vm) = self.lock().vms.iter_mut().find(|vm| vm.record.name == name) {
            f(vm);
        }
    }

    fn vm(&self, name: &str) -> Result<FakeVm> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .vms
            .iter()
            .find(|vm| vm.record.name == name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
    }

    fn scripted_failure(operation: &str, name: &str) -> Error {
        Error::CommandFailed {
            operation: operation.to_string(),
            code: Some(1),
            stderr: format!("simulated {} failure for {}", operation, name),
        }
    }

    fn enter_dispatch(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl Inventory for InMemoryFleet {
    async fn ensure_authenticated(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.lock().unauthenticated {
            return Err(Error::NotAuthenticated("no login session".to_string()));
        }
        Ok(())
    }

    async fn list(&self, _group: &str) -> Result<Vec<VmRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().vms.iter().map(|vm| vm.record.clone()).collect())
    }

    async fn get(&self, _group: &str, name: &str) -> Result<Option<VmRecord>> {
        match self.vm(name) {
            Ok(vm) => Ok(Some(vm.record)),
            Err(Error::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LicenseMetadata for InMemoryFleet {
    async fn license_type(&self, _group: &str, name: &str) -> Result<String> {
        let vm = self.vm(name)?;
        if vm.failures.contains(&FailurePoint::LicenseRead) {
            return Err(Self::scripted_failure("vm show", name));
        }
        Ok(vm.license)
    }

    async fn set_license_type(&self, _group: &str, name: &str, value: &str) -> Result<()> {
        let vm = self.vm(name)?;
        if vm.failures.contains(&FailurePoint::LicenseUpdate) {
            return Err(Self::scripted_failure("vm update", name));
        }
        if !vm.lag_license_update {
            self.update_vm(name, |vm| vm.license = value.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for InMemoryFleet {
    async fn invoke(&self, _group: &str, name: &str, script: &RemoteScript) -> Result<RemoteOutput> {
        let vm = self.vm(name)?;
        let _in_flight = self.enter_dispatch();
        self.lock()
            .dispatched
            .push((name.to_string(), script.clone()));

        if !self.dispatch_delay.is_zero() {
            smol::Timer::after(self.dispatch_delay).await;
        }

        match script.purpose {
            ScriptPurpose::Conversion => {
                if vm.panic_on_dispatch {
                    panic!("simulated crash while dispatching to {}", name);
                }
                if vm.failures.contains(&FailurePoint::Dispatch) {
                    return Err(Self::scripted_failure("vm run-command invoke", name));
                }
                Ok(RemoteOutput {
                    exit_status: 0,
                    output: format!("Enable succeeded:\n[stdout]\nconverted {}\n[stderr]", name),
                })
            }
            ScriptPurpose::Probe => {
                if vm.failures.contains(&FailurePoint::Probe) {
                    return Err(Self::scripted_failure("vm run-command invoke", name));
                }
                Ok(RemoteOutput {
                    exit_status: 0,
                    output: vm.probe_output,
                })
            }
            ScriptPurpose::BackupCleanup => Ok(RemoteOutput {
                exit_status: 0,
                output: format!("backup removed on {}", name),
            }),
        }
    }
}

#[async_trait]
impl SecretStore for InMemoryFleet {
    async fn get_secret(&self, store: &str, name: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .secrets
            .get(&(store.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::CommandFailed {
                operation: "keyvault secret show".to_string(),
                code: Some(3),
                stderr: format!("(SecretNotFound) A secret with name {} was not found in {}", name, store),
            })
    }
}
