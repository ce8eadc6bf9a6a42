use std::{
    path::{Path, PathBuf},
    task::Poll,
};

use derive_new::new;
use getset::{CopyGetters, Getters};
use tracing::{debug, info};

use crate::{
    abi::{decode_status, AgentExport, HookRequest},
    error::{ErrorCode, HookError},
    process::TargetProcess,
};

use super::{ArmedHooks, CallPolicy, ExportName, HookDescriptor, HookPlan, HookState};

/// The agent as loaded into one target process.
#[derive(CopyGetters, Getters, Debug, Clone, PartialEq, Eq, new)]
pub struct AgentModule {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get_copy = "pub")]
    pid: u32,
    /// Load address inside the target.
    #[getset(get_copy = "pub")]
    base: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum CallArg<'a> {
    None,
    Value(u32),
    Request(&'a HookRequest),
}

/// Cross-process access to the agent: loading it and calling its exports.
pub trait AgentHost {
    /// Starts loading the agent into `process`. Its initialization runs in
    /// the target while the caller polls [`AgentHost::poll_load`].
    fn start_load(&mut self, process: &TargetProcess, path: &Path) -> Result<(), HookError>;

    /// Ready once the agent's initialization has returned. Fails with
    /// [`HookError::AgentLoad`] carrying the path and extended code.
    fn poll_load(&mut self) -> Poll<Result<AgentModule, HookError>>;

    fn call(
        &mut self,
        agent: &AgentModule,
        export: AgentExport,
        arg: CallArg<'_>,
    ) -> Result<u32, HookError>;
}

pub struct HookInstaller<'h, H: AgentHost> {
    host: &'h mut H,
    agent: AgentModule,
}

impl<'h, H: AgentHost> HookInstaller<'h, H> {
    /// Hooks can only be requested from an agent that finished loading.
    pub fn new(host: &'h mut H, agent: AgentModule) -> Self {
        debug!("agent base: {:#x}", agent.base());
        Self { host, agent }
    }

    pub fn agent(&self) -> &AgentModule {
        &self.agent
    }

    fn call_for_status(
        &mut self,
        export: AgentExport,
        arg: CallArg<'_>,
    ) -> Result<Result<u32, ErrorCode>, HookError> {
        let raw = self.host.call(&self.agent, export, arg)?;
        Ok(decode_status(raw))
    }

    pub fn install(
        &mut self,
        export: &ExportName,
        policy: CallPolicy,
    ) -> Result<HookDescriptor, HookError> {
        let request = HookRequest::new(export, policy)?;
        let id = self
            .call_for_status(AgentExport::InstallHook, CallArg::Request(&request))?
            .map_err(|code| HookError::Install {
                export: export.clone(),
                code,
            })?;
        debug!("installed {} ({:?}) as #{}", export, policy, id);
        Ok(HookDescriptor::installed(export.clone(), policy, id))
    }

    pub fn attach(&mut self, hook: &mut HookDescriptor) -> Result<(), HookError> {
        if hook.state() != HookState::Installed {
            return Ok(());
        }
        self.call_for_status(AgentExport::AttachHook, CallArg::Value(hook.remote_id()))?
            .map_err(|code| HookError::Attach {
                export: hook.export().clone(),
                code,
            })?;
        hook.set_state(HookState::Attached);
        Ok(())
    }

    pub fn arm(&mut self, hook: &mut HookDescriptor) -> Result<(), HookError> {
        match hook.state() {
            HookState::Installed => return Err(HookError::NotAttached(hook.export().clone())),
            HookState::Armed => return Ok(()),
            HookState::Attached => {}
        }
        self.call_for_status(AgentExport::ArmHook, CallArg::Value(hook.remote_id()))?
            .map_err(|code| HookError::Arm {
                export: hook.export().clone(),
                code,
            })?;
        hook.set_state(HookState::Armed);
        Ok(())
    }

    /// Installs and attaches every hook, then arms them all. Stops at the
    /// first failure.
    pub fn install_plan(mut self, plan: &HookPlan) -> Result<(AgentModule, ArmedHooks), HookError> {
        let mut hooks = Vec::with_capacity(plan.hooks().len());
        for (export, policy) in plan.hooks() {
            let mut hook = self.install(export, *policy)?;
            self.attach(&mut hook)?;
            hooks.push(hook);
        }
        for hook in &mut hooks {
            self.arm(hook)?;
        }
        info!("{} hooks armed", hooks.len());
        Ok((self.agent, ArmedHooks::new(hooks)))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, HashSet};

    use crate::abi::encode_error;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum AgentCall {
        Load(PathBuf),
        Install(String),
        Attach(u32),
        Arm(u32),
        Query(AgentExport),
    }

    #[derive(Default)]
    pub struct FakeAgentHost {
        pub load_error: Option<ErrorCode>,
        /// Polls answered with `Pending` before the load completes.
        pub load_polls: u32,
        /// Export names the fake target does not have, with the code reported.
        pub missing: HashMap<String, ErrorCode>,
        pub fail_arm: HashSet<u32>,
        pub values: HashMap<AgentExport, u32>,
        pub calls: Vec<AgentCall>,
        loading: Option<(PathBuf, u32)>,
        next_id: u32,
    }

    impl AgentHost for FakeAgentHost {
        fn start_load(&mut self, process: &TargetProcess, path: &Path) -> Result<(), HookError> {
            self.calls.push(AgentCall::Load(path.to_owned()));
            self.loading = Some((path.to_owned(), process.pid()));
            Ok(())
        }

        fn poll_load(&mut self) -> Poll<Result<AgentModule, HookError>> {
            if self.load_polls > 0 {
                self.load_polls -= 1;
                return Poll::Pending;
            }
            let (path, pid) = self.loading.take().expect("start_load first");
            Poll::Ready(match self.load_error {
                Some(code) => Err(HookError::AgentLoad { path, code }),
                None => Ok(AgentModule::new(path, pid, 0x1000_0000)),
            })
        }

        fn call(
            &mut self,
            _agent: &AgentModule,
            export: AgentExport,
            arg: CallArg<'_>,
        ) -> Result<u32, HookError> {
            match (export, arg) {
                (AgentExport::InstallHook, CallArg::Request(request)) => {
                    let (name, _) = request.decode()?;
                    let name = name.to_string();
                    self.calls.push(AgentCall::Install(name.clone()));
                    if let Some(code) = self.missing.get(&name) {
                        return Ok(encode_error(*code));
                    }
                    self.next_id += 1;
                    Ok(self.next_id)
                }
                (AgentExport::AttachHook, CallArg::Value(id)) => {
                    self.calls.push(AgentCall::Attach(id));
                    Ok(0)
                }
                (AgentExport::ArmHook, CallArg::Value(id)) => {
                    self.calls.push(AgentCall::Arm(id));
                    if self.fail_arm.contains(&id) {
                        return Ok(encode_error(5));
                    }
                    Ok(0)
                }
                (export, _) => {
                    self.calls.push(AgentCall::Query(export));
                    Ok(self.values.get(&export).copied().unwrap_or(0))
                }
            }
        }
    }
}
