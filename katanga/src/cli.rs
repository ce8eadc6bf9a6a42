use std::path::PathBuf;

use clap::Parser;
use katanga_lib::launch_params::{GraphicsApi, LaunchRequest, LaunchVariant};

/// Launches a game, hooks its graphics and shares every frame with this
/// process.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    #[arg(long)]
    pub game_path: Option<PathBuf>,
    #[arg(long)]
    pub game_title: Option<String>,
    /// suspended, deferred, store or slideshow. Inferred when omitted.
    #[arg(long)]
    pub launch_type: Option<LaunchVariant>,
    /// Executable name of the process to hook, e.g. `Game.exe`.
    #[arg(long)]
    pub game_waitfor_exe: Option<String>,
    #[arg(long)]
    pub steam_path: Option<PathBuf>,
    #[arg(long)]
    pub steam_appid: Option<String>,
    /// Passed to the game verbatim.
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub game_args: String,
    #[arg(long, default_value = "auto")]
    pub api: GraphicsApi,
    /// Defaults to katanga.toml next to the executable.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            game_path: self.game_path.clone(),
            title: self.game_title.clone(),
            variant: self.launch_type,
            wait_for: self.game_waitfor_exe.clone(),
            steam_path: self.steam_path.clone(),
            steam_app_id: self.steam_appid.clone(),
            args: self.game_args.clone(),
            api: self.api,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn game_args_are_kept_verbatim() {
        let cli = Cli::try_parse_from([
            "katanga",
            "--game-path",
            "C:/Games/Foo/Foo.exe",
            "--game-args",
            "-windowed -dx9 +fov 90",
        ])
        .unwrap();
        let params = cli.launch_request().resolve().unwrap();
        assert_eq!(params.args(), "-windowed -dx9 +fov 90");
        assert_eq!(*params.variant(), LaunchVariant::SuspendedLaunch);
        assert_eq!(
            params.game_path().as_deref(),
            Some(Path::new("C:/Games/Foo/Foo.exe"))
        );
        assert_eq!(params.title(), "Foo.exe");
    }

    #[test]
    fn store_flags_pick_the_store_launch() {
        let cli = Cli::try_parse_from([
            "katanga",
            "--steam-appid",
            "377160",
            "--game-waitfor-exe",
            "Fallout4.exe",
            "--api",
            "dx11",
        ])
        .unwrap();
        let params = cli.launch_request().resolve().unwrap();
        assert_eq!(*params.variant(), LaunchVariant::StoreLaunch);
        assert_eq!(*params.api(), GraphicsApi::Dx11);
        assert_eq!(params.store_args().as_deref(), Some("-applaunch 377160"));
    }

    #[test]
    fn explicit_launch_type_wins() {
        let cli = Cli::try_parse_from(["katanga", "--launch-type", "slideshow"]).unwrap();
        let params = cli.launch_request().resolve().unwrap();
        assert_eq!(*params.variant(), LaunchVariant::SlideshowStub);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(Cli::try_parse_from(["katanga", "--launch-type", "uplay"]).is_err());
        assert!(Cli::try_parse_from(["katanga", "--api", "vulkan"]).is_err());
    }
}
