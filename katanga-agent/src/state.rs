use std::{
    path::Path,
    sync::{Mutex, MutexGuard, OnceLock},
};

use anyhow::{Context, Result};
use katanga_lib::{
    config::{Settings, CONFIG_FILE_NAME},
    frame_sync::{GateWait, PacingGate},
    surface::{PublishedSurface, SurfacePublisher},
    win32::{NamedEvent, NamedMutex},
};
use tracing::{info, warn};

use crate::{detours::Win32Detour, hook_table::HookTable};

/// What the getter exports answer with.
pub static PUBLISHED: PublishedSurface = PublishedSurface::new();

static AGENT: OnceLock<Agent> = OnceLock::new();

struct Pacing {
    gate: PacingGate,
    event: Option<NamedEvent>,
}

pub struct Agent {
    publisher: Mutex<SurfacePublisher<'static, NamedMutex>>,
    pacing: Mutex<Pacing>,
    hooks: Mutex<HookTable<Win32Detour>>,
}

/// Poisoning only means a hook panicked mid-frame; the data is still usable.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn agent() -> Option<&'static Agent> {
    AGENT.get()
}

/// Opens the consumer's objects. Without the setup mutex there is nobody to
/// hand surfaces to, so that one is required.
pub fn init(dll_dir: &Path) -> Result<()> {
    let settings = Settings::load(&dll_dir.join(CONFIG_FILE_NAME))?;
    let mutex = NamedMutex::open(&settings.names.setup_mutex)
        .context("Katanga is not running")?;
    let event = match NamedEvent::open(&settings.names.frame_event) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!("{}, presenting without pacing", err);
            None
        }
    };
    let agent = Agent {
        publisher: Mutex::new(SurfacePublisher::new(
            mutex,
            &PUBLISHED,
            settings.agent.setup_timeout(),
        )),
        pacing: Mutex::new(Pacing {
            gate: PacingGate::new(
                settings.agent.pacing_timeout(),
                settings.agent.pacing_relax_after,
            ),
            event,
        }),
        hooks: Mutex::new(HookTable::default()),
    };
    if AGENT.set(agent).is_err() {
        warn!("agent initialized twice");
    }
    info!("agent ready");
    Ok(())
}

impl Agent {
    pub fn publisher(&self) -> MutexGuard<'_, SurfacePublisher<'static, NamedMutex>> {
        lock(&self.publisher)
    }

    pub fn hooks(&self) -> MutexGuard<'_, HookTable<Win32Detour>> {
        lock(&self.hooks)
    }

    /// Holds the present until the consumer opens the window or the gate
    /// gives up.
    pub fn pace(&self) {
        let mut pacing = lock(&self.pacing);
        let Pacing { gate, event } = &mut *pacing;
        let Some(event) = event else {
            return;
        };
        if let GateWait::Wait(timeout) = gate.next() {
            let outcome = event.wait(timeout);
            gate.record(outcome);
        }
    }
}
