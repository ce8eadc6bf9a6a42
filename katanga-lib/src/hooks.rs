mod installer;

use std::{fmt, str::FromStr};

use getset::{CopyGetters, Getters};

use crate::{
    error::{HookError, LaunchError},
    launch_params::{GraphicsApi, LaunchVariant},
    process::{ProcessControl, TargetProcess},
};

#[cfg(test)]
pub(crate) use installer::fake;
pub use installer::{AgentHost, AgentModule, CallArg, HookInstaller};

/// `MODULE!Symbol`, e.g. `D3D11.DLL!D3D11CreateDevice`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExportName {
    module: String,
    symbol: String,
}

impl ExportName {
    pub fn new(module: &str, symbol: &str) -> Self {
        Self {
            module: module.to_ascii_uppercase(),
            symbol: symbol.to_owned(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for ExportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.symbol)
    }
}

impl FromStr for ExportName {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('!') {
            Some((module, symbol))
                if !module.is_empty() && !symbol.is_empty() && !symbol.contains('!') =>
            {
                Ok(Self::new(module, symbol))
            }
            _ => Err(HookError::MalformedName(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPolicy {
    /// The detour replaces the call before the original runs.
    PreCall,
    /// The detour sees the result after the original returns.
    PostCall,
    /// Both sides. Used for activation hooks.
    Both,
}

impl CallPolicy {
    pub fn to_raw(self) -> u32 {
        match self {
            CallPolicy::PreCall => 1,
            CallPolicy::PostCall => 2,
            CallPolicy::Both => 3,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(CallPolicy::PreCall),
            2 => Some(CallPolicy::PostCall),
            3 => Some(CallPolicy::Both),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookState {
    Installed,
    Attached,
    Armed,
}

#[derive(CopyGetters, Getters, Debug, Clone, PartialEq, Eq)]
pub struct HookDescriptor {
    #[getset(get = "pub")]
    export: ExportName,
    #[getset(get_copy = "pub")]
    policy: CallPolicy,
    /// Identifier the agent handed back for this hook.
    #[getset(get_copy = "pub")]
    remote_id: u32,
    #[getset(get_copy = "pub")]
    state: HookState,
}

impl HookDescriptor {
    pub(crate) fn installed(export: ExportName, policy: CallPolicy, remote_id: u32) -> Self {
        Self {
            export,
            policy,
            remote_id,
            state: HookState::Installed,
        }
    }

    pub(crate) fn set_state(&mut self, state: HookState) {
        self.state = state;
    }
}

pub mod well_known {
    use super::{CallPolicy, ExportName};

    pub fn d3d11_create_device() -> (ExportName, CallPolicy) {
        (
            ExportName::new("D3D11.DLL", "D3D11CreateDevice"),
            CallPolicy::Both,
        )
    }

    pub fn d3d11_create_device_and_swap_chain() -> (ExportName, CallPolicy) {
        (
            ExportName::new("D3D11.DLL", "D3D11CreateDeviceAndSwapChain"),
            CallPolicy::Both,
        )
    }

    pub fn create_dxgi_factory() -> (ExportName, CallPolicy) {
        (
            ExportName::new("DXGI.DLL", "CreateDXGIFactory"),
            CallPolicy::PostCall,
        )
    }

    pub fn create_dxgi_factory1() -> (ExportName, CallPolicy) {
        (
            ExportName::new("DXGI.DLL", "CreateDXGIFactory1"),
            CallPolicy::PostCall,
        )
    }

    pub fn direct3d_create9() -> (ExportName, CallPolicy) {
        (
            ExportName::new("D3D9.DLL", "Direct3DCreate9"),
            CallPolicy::PreCall,
        )
    }

    pub fn direct3d_create9_ex() -> (ExportName, CallPolicy) {
        (
            ExportName::new("D3D9.DLL", "Direct3DCreate9Ex"),
            CallPolicy::PreCall,
        )
    }
}

/// The ordered list of hooks a launch scenario needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPlan(Vec<(ExportName, CallPolicy)>);

impl HookPlan {
    pub fn for_launch(variant: LaunchVariant, api: GraphicsApi) -> Self {
        use well_known::*;

        if !variant.has_process() {
            return Self(vec![]);
        }
        // The activation hook tells the agent a D3D11 device is coming, in every scenario.
        let mut hooks = vec![d3d11_create_device()];
        if variant != LaunchVariant::SuspendedLaunch {
            return Self(hooks);
        }
        let dx9 = || vec![direct3d_create9()];
        let dx11 = || {
            vec![
                d3d11_create_device_and_swap_chain(),
                create_dxgi_factory(),
                create_dxgi_factory1(),
            ]
        };
        match api {
            GraphicsApi::Dx9 => hooks.extend(dx9()),
            GraphicsApi::Dx9Ex => hooks.push(direct3d_create9_ex()),
            GraphicsApi::Dx11 => hooks.extend(dx11()),
            GraphicsApi::Auto => {
                hooks.extend(dx11());
                hooks.extend(dx9());
            }
        }
        Self(hooks)
    }

    pub fn hooks(&self) -> &[(ExportName, CallPolicy)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Proof that every hook of a plan is armed. Only [`HookInstaller::install_plan`]
/// builds one, and resuming a suspended process needs it.
#[derive(Debug)]
pub struct ArmedHooks {
    hooks: Vec<HookDescriptor>,
}

impl ArmedHooks {
    pub(crate) fn new(hooks: Vec<HookDescriptor>) -> Self {
        debug_assert!(hooks.iter().all(|x| x.state() == HookState::Armed));
        Self { hooks }
    }

    pub fn hooks(&self) -> &[HookDescriptor] {
        &self.hooks
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Lets a suspended target run. A no-op for targets that were never suspended.
    pub fn resume(
        &self,
        control: &mut impl ProcessControl,
        process: &mut TargetProcess,
    ) -> Result<(), LaunchError> {
        let Some(token) = process.take_resume_token() else {
            return Ok(());
        };
        control.resume(token, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &HookPlan) -> Vec<String> {
        plan.hooks().iter().map(|(x, _)| x.to_string()).collect()
    }

    #[test]
    fn export_name_round_trips_through_text() {
        let name: ExportName = "d3d11.dll!D3D11CreateDevice".parse().unwrap();
        assert_eq!(name.module(), "D3D11.DLL");
        assert_eq!(name.symbol(), "D3D11CreateDevice");
        assert_eq!(name.to_string(), "D3D11.DLL!D3D11CreateDevice");
    }

    #[test]
    fn malformed_export_names_are_rejected() {
        for text in ["D3D11CreateDevice", "!Foo", "D3D9.DLL!", "a!b!c"] {
            assert!(text.parse::<ExportName>().is_err(), "{}", text);
        }
    }

    #[test]
    fn call_policy_raw_values_are_stable() {
        for policy in [CallPolicy::PreCall, CallPolicy::PostCall, CallPolicy::Both] {
            assert_eq!(CallPolicy::from_raw(policy.to_raw()), Some(policy));
        }
        assert_eq!(CallPolicy::from_raw(0), None);
    }

    #[test]
    fn deferred_and_store_only_get_the_activation_hook() {
        for variant in [LaunchVariant::DeferredWait, LaunchVariant::StoreLaunch] {
            let plan = HookPlan::for_launch(variant, GraphicsApi::Dx9);
            assert_eq!(names(&plan), ["D3D11.DLL!D3D11CreateDevice"]);
            assert_eq!(plan.hooks()[0].1, CallPolicy::Both);
        }
    }

    #[test]
    fn slideshow_gets_nothing() {
        assert!(HookPlan::for_launch(LaunchVariant::SlideshowStub, GraphicsApi::Auto).is_empty());
    }

    #[test]
    fn suspended_dx9_hooks_creation_before_the_call() {
        let plan = HookPlan::for_launch(LaunchVariant::SuspendedLaunch, GraphicsApi::Dx9);
        assert_eq!(
            names(&plan),
            ["D3D11.DLL!D3D11CreateDevice", "D3D9.DLL!Direct3DCreate9"]
        );
        assert_eq!(plan.hooks()[1].1, CallPolicy::PreCall);
    }

    #[test]
    fn suspended_dx11_hooks_factories_after_the_call() {
        let plan = HookPlan::for_launch(LaunchVariant::SuspendedLaunch, GraphicsApi::Dx11);
        assert_eq!(
            names(&plan),
            [
                "D3D11.DLL!D3D11CreateDevice",
                "D3D11.DLL!D3D11CreateDeviceAndSwapChain",
                "DXGI.DLL!CreateDXGIFactory",
                "DXGI.DLL!CreateDXGIFactory1",
            ]
        );
        assert_eq!(plan.hooks()[2].1, CallPolicy::PostCall);
        assert_eq!(plan.hooks()[3].1, CallPolicy::PostCall);
    }

    #[test]
    fn suspended_auto_covers_both_apis() {
        let plan = HookPlan::for_launch(LaunchVariant::SuspendedLaunch, GraphicsApi::Auto);
        assert_eq!(plan.hooks().len(), 5);
        assert!(names(&plan).contains(&"D3D9.DLL!Direct3DCreate9".to_owned()));
    }
}
