use getset::{Getters, MutGetters};
use tracing::info;

use crate::{
    abi::AgentExport,
    error::{HookError, KatangaError},
    hooks::{AgentHost, AgentModule, ArmedHooks, CallArg, HookInstaller, HookPlan},
    process::{ProcessControl, TargetProcess},
    surface::{RawSurfaceDesc, SharedSurfaceHandle, SurfaceSource},
};

/// One hooked game: the process, the agent inside it and the hooks it armed.
#[derive(Getters, MutGetters, Debug)]
pub struct InjectionSession {
    #[getset(get = "pub", get_mut = "pub")]
    process: TargetProcess,
    #[getset(get = "pub")]
    agent: AgentModule,
    #[getset(get = "pub")]
    hooks: ArmedHooks,
}

impl InjectionSession {
    /// Arms every hook of `plan` through the loaded agent, then lets a
    /// suspended target run. Nothing after a failed step is attempted.
    pub fn establish(
        host: &mut impl AgentHost,
        control: &mut impl ProcessControl,
        mut process: TargetProcess,
        agent: AgentModule,
        plan: &HookPlan,
    ) -> Result<Self, KatangaError> {
        let installer = HookInstaller::new(host, agent);
        let (agent, hooks) = installer.install_plan(plan)?;
        hooks.resume(control, &mut process)?;
        info!("{} is running with {} hooks", process.exe_name(), hooks.len());
        Ok(Self {
            process,
            agent,
            hooks,
        })
    }

    /// A surface source that asks this session's agent.
    pub fn surface_source<'a, H: AgentHost>(&'a self, host: &'a mut H) -> AgentSurfaceSource<'a, H> {
        AgentSurfaceSource {
            host,
            agent: &self.agent,
        }
    }
}

pub struct AgentSurfaceSource<'a, H: AgentHost> {
    host: &'a mut H,
    agent: &'a AgentModule,
}

impl<'a, H: AgentHost> AgentSurfaceSource<'a, H> {
    fn query(&mut self, export: AgentExport) -> Result<u32, HookError> {
        self.host.call(self.agent, export, CallArg::None)
    }
}

impl<'a, H: AgentHost> SurfaceSource for AgentSurfaceSource<'a, H> {
    fn shared_handle(&mut self) -> Result<SharedSurfaceHandle, KatangaError> {
        Ok(SharedSurfaceHandle::new(
            self.query(AgentExport::GetSharedHandle)?,
        ))
    }

    fn describe(&mut self) -> Result<RawSurfaceDesc, KatangaError> {
        Ok(RawSurfaceDesc {
            width: self.query(AgentExport::GetWidth)?,
            height: self.query(AgentExport::GetHeight)?,
            format: self.query(AgentExport::GetPixelFormat)?,
        })
    }
}
