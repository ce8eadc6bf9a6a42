use std::{
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use katanga_lib::{
    config::Settings,
    frame_sync::FrameSynchronizer,
    hooks::HookPlan,
    launch_params::LaunchParams,
    launcher::Launched,
    liveness::ExitWatch,
    process::TargetProcess,
    session::InjectionSession,
    surface::{NoSurface, SurfaceBroker},
    win32::{D3D11Importer, NamedEvent, NamedMutex, RemoteAgentHost, Win32ProcessControl},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cli::Cli,
    frame_loop::{run_frames, Ended, FrameLoop},
    launch::{drive_agent_load, drive_launcher},
};

const AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const AGENT_LOAD_POLL: Duration = Duration::from_millis(10);

type Frames = FrameLoop<NamedMutex, NamedEvent, D3D11Importer>;

/// Hooks the launched game and shows its frames until one side ends.
async fn run_target(
    frames: &mut Frames,
    process: TargetProcess,
    params: &LaunchParams,
    settings: &Settings,
    exe_dir: &Path,
    control: &mut Win32ProcessControl,
    cancel: &CancellationToken,
) -> Result<Ended> {
    let agent_path = settings.agent.path_in(exe_dir, process.bitness());
    let mut host = RemoteAgentHost::new(AGENT_CALL_TIMEOUT);
    let Some(agent) =
        drive_agent_load(&mut host, &process, &agent_path, AGENT_LOAD_POLL, cancel).await?
    else {
        return Ok(Ended::Cancelled);
    };
    let plan = HookPlan::for_launch(*params.variant(), *params.api());
    let mut session = InjectionSession::establish(&mut host, &mut *control, process, agent, &plan)?;
    let mut watch = ExitWatch::new(
        session.process().exe_name().clone(),
        Instant::now(),
        &settings.exit_watch,
    );
    let ended = {
        let mut source = session.surface_source(&mut host);
        run_frames(
            frames,
            &mut source,
            Some(&mut watch),
            &*control,
            cancel,
            settings.frame.period(),
        )
        .await?
    };
    if ended == Ended::TargetExited {
        session.process_mut().mark_exited();
    }
    Ok(ended)
}

pub async fn run(
    cli: &Cli,
    settings: Settings,
    exe_dir: &Path,
    cancel: CancellationToken,
) -> Result<()> {
    let params = cli.launch_request().resolve()?;
    info!("{} ({})", params.title(), params.variant());

    // both must exist before the agent looks for them
    let mutex = NamedMutex::create(&settings.names.setup_mutex)?;
    let event = NamedEvent::create(&settings.names.frame_event)?;
    let importer = D3D11Importer::new().context("Could not create the consumer device")?;
    let mut frames = FrameLoop::new(
        mutex,
        FrameSynchronizer::new(event, settings.frame.stop_after()),
        SurfaceBroker::new(importer),
    );
    let period = settings.frame.period();

    let mut control = Win32ProcessControl::new();
    let Some(launched) =
        drive_launcher(params.clone(), settings.launch.clone(), &mut control, &cancel).await?
    else {
        return Ok(());
    };

    // the target is let go whether or not the session failed
    let ended = match launched {
        Launched::Slideshow => {
            run_frames(&mut frames, &mut NoSurface, None, &control, &cancel, period)
                .await
                .map_err(anyhow::Error::from)
        }
        Launched::Process(process) => {
            run_target(
                &mut frames,
                process,
                &params,
                &settings,
                exe_dir,
                &mut control,
                &cancel,
            )
            .await
        }
    };
    frames.shutdown();
    let ended = ended?;
    info!("session over: {:?}", ended);
    Ok(())
}
