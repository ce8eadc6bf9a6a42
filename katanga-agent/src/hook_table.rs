use katanga_lib::{
    error::ErrorCode,
    hooks::{CallPolicy, ExportName, HookState},
};
use tracing::debug;

// Win32 codes; this table also builds where the windows crate is absent
const ERROR_INVALID_PARAMETER: ErrorCode = 87;
const ERROR_INVALID_STATE: ErrorCode = 5023;

/// One installed detour, as far as the table is concerned.
pub trait Detour {
    /// Makes the original reachable from the handler.
    fn attach(&mut self) -> Result<(), ErrorCode>;

    /// Starts diverting calls.
    fn enable(&mut self) -> Result<(), ErrorCode>;
}

struct Entry<D> {
    export: ExportName,
    policy: CallPolicy,
    state: HookState,
    detour: D,
}

/// Hooks by remote id. Ids start at 1 and never reuse a slot.
pub struct HookTable<D: Detour> {
    entries: Vec<Entry<D>>,
}

impl<D: Detour> Default for HookTable<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D: Detour> HookTable<D> {
    pub fn find(&self, export: &ExportName) -> Option<u32> {
        self.entries
            .iter()
            .position(|x| x.export == *export)
            .map(|x| x as u32 + 1)
    }

    pub fn install(&mut self, export: ExportName, policy: CallPolicy, detour: D) -> u32 {
        self.entries.push(Entry {
            export,
            policy,
            state: HookState::Installed,
            detour,
        });
        self.entries.len() as u32
    }

    fn entry_mut(&mut self, id: u32) -> Result<&mut Entry<D>, ErrorCode> {
        let index = (id as usize)
            .checked_sub(1)
            .ok_or(ERROR_INVALID_PARAMETER)?;
        self.entries.get_mut(index).ok_or(ERROR_INVALID_PARAMETER)
    }

    pub fn attach(&mut self, id: u32) -> Result<(), ErrorCode> {
        let entry = self.entry_mut(id)?;
        if entry.state != HookState::Installed {
            return Ok(());
        }
        entry.detour.attach()?;
        entry.state = HookState::Attached;
        Ok(())
    }

    pub fn arm(&mut self, id: u32) -> Result<(), ErrorCode> {
        let entry = self.entry_mut(id)?;
        match entry.state {
            HookState::Installed => Err(ERROR_INVALID_STATE),
            HookState::Armed => Ok(()),
            HookState::Attached => {
                entry.detour.enable()?;
                entry.state = HookState::Armed;
                debug!("armed #{} {} ({:?})", id, entry.export, entry.policy);
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn state(&self, id: u32) -> Option<HookState> {
        let index = (id as usize).checked_sub(1)?;
        self.entries.get(index).map(|x| x.state)
    }

    #[cfg(test)]
    pub fn policy(&self, id: u32) -> Option<CallPolicy> {
        let index = (id as usize).checked_sub(1)?;
        self.entries.get(index).map(|x| x.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorded {
        attached: bool,
        enabled: bool,
        fail_enable: Option<ErrorCode>,
    }

    impl Detour for Recorded {
        fn attach(&mut self) -> Result<(), ErrorCode> {
            self.attached = true;
            Ok(())
        }

        fn enable(&mut self) -> Result<(), ErrorCode> {
            if let Some(code) = self.fail_enable {
                return Err(code);
            }
            assert!(self.attached);
            self.enabled = true;
            Ok(())
        }
    }

    fn create_device() -> ExportName {
        ExportName::new("d3d11.dll", "D3D11CreateDevice")
    }

    #[test]
    fn ids_start_at_one() {
        let mut table = HookTable::default();
        let first = table.install(create_device(), CallPolicy::Both, Recorded::default());
        let second = table.install(
            ExportName::new("dxgi.dll", "CreateDXGIFactory"),
            CallPolicy::PostCall,
            Recorded::default(),
        );
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.find(&create_device()), Some(1));
        assert_eq!(table.policy(2), Some(CallPolicy::PostCall));
    }

    #[test]
    fn arming_requires_attaching_first() {
        let mut table = HookTable::default();
        let id = table.install(create_device(), CallPolicy::Both, Recorded::default());
        assert_eq!(table.arm(id), Err(ERROR_INVALID_STATE));
        table.attach(id).unwrap();
        table.arm(id).unwrap();
        assert_eq!(table.state(id), Some(HookState::Armed));
        // repeated requests are harmless
        table.attach(id).unwrap();
        table.arm(id).unwrap();
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut table = HookTable::<Recorded>::default();
        assert_eq!(table.attach(0), Err(ERROR_INVALID_PARAMETER));
        assert_eq!(table.arm(3), Err(ERROR_INVALID_PARAMETER));
        assert_eq!(table.state(1), None);
    }

    #[test]
    fn a_failed_enable_leaves_the_hook_attached() {
        let mut table = HookTable::default();
        let id = table.install(
            create_device(),
            CallPolicy::Both,
            Recorded {
                fail_enable: Some(5),
                ..Default::default()
            },
        );
        table.attach(id).unwrap();
        assert_eq!(table.arm(id), Err(5));
        assert_eq!(table.state(id), Some(HookState::Attached));
    }
}
