use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use getset::Getters;

use crate::error::LaunchError;

pub const DEFAULT_STEAM_PATH: &str = r"C:\Program Files (x86)\Steam\steam.exe";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchVariant {
    /// Create the game suspended, hook it, then resume.
    SuspendedLaunch,
    /// Start (or expect) the game normally and wait for its process by name.
    DeferredWait,
    /// Ask the Steam client to start the game, then wait like `DeferredWait`.
    StoreLaunch,
    /// No game at all. The surface source never publishes anything.
    SlideshowStub,
}

impl LaunchVariant {
    pub fn has_process(self) -> bool {
        !matches!(self, LaunchVariant::SlideshowStub)
    }
}

impl fmt::Display for LaunchVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaunchVariant::SuspendedLaunch => "suspended",
            LaunchVariant::DeferredWait => "deferred",
            LaunchVariant::StoreLaunch => "store",
            LaunchVariant::SlideshowStub => "slideshow",
        })
    }
}

impl FromStr for LaunchVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "suspended" | "direct" => LaunchVariant::SuspendedLaunch,
            "deferred" | "waitfor" => LaunchVariant::DeferredWait,
            "store" | "steam" => LaunchVariant::StoreLaunch,
            "slideshow" => LaunchVariant::SlideshowStub,
            _ => return Err(format!("unknown launch type: {}", s)),
        })
    }
}

/// Which device-creation path the game is expected to take. Only matters for
/// suspended launches, where the hooks must be in place before the first call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GraphicsApi {
    #[default]
    Auto,
    Dx9,
    Dx9Ex,
    Dx11,
}

impl FromStr for GraphicsApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "auto" => GraphicsApi::Auto,
            "dx9" => GraphicsApi::Dx9,
            "dx9ex" => GraphicsApi::Dx9Ex,
            "dx11" => GraphicsApi::Dx11,
            _ => return Err(format!("unknown graphics api: {}", s)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTarget {
    pub launcher: PathBuf,
    pub app_id: String,
}

/// Raw inputs as they come from the command line.
#[derive(Clone, Debug, Default)]
pub struct LaunchRequest {
    pub game_path: Option<PathBuf>,
    pub title: Option<String>,
    pub variant: Option<LaunchVariant>,
    pub wait_for: Option<String>,
    pub steam_path: Option<PathBuf>,
    pub steam_app_id: Option<String>,
    pub args: String,
    pub api: GraphicsApi,
}

#[derive(Clone, Debug, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct LaunchParams {
    variant: LaunchVariant,
    game_path: Option<PathBuf>,
    title: String,
    wait_for: Option<String>,
    store: Option<StoreTarget>,
    args: String,
    api: GraphicsApi,
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|x| x.to_string_lossy().into_owned())
}

impl LaunchRequest {
    fn infer_variant(&self) -> LaunchVariant {
        if self.steam_app_id.is_some() {
            LaunchVariant::StoreLaunch
        } else if self.wait_for.is_some() {
            LaunchVariant::DeferredWait
        } else {
            LaunchVariant::SuspendedLaunch
        }
    }

    pub fn resolve(self) -> Result<LaunchParams, LaunchError> {
        let variant = self.variant.unwrap_or_else(|| self.infer_variant());
        let wait_for = match variant {
            LaunchVariant::SuspendedLaunch => {
                let game_path = self.game_path.as_deref().ok_or(LaunchError::NoGame)?;
                self.wait_for.clone().or_else(|| file_name_of(game_path))
            }
            LaunchVariant::DeferredWait | LaunchVariant::StoreLaunch => Some(
                self.wait_for
                    .clone()
                    .or_else(|| self.game_path.as_deref().and_then(file_name_of))
                    .ok_or(LaunchError::MissingWaitFor)?,
            ),
            LaunchVariant::SlideshowStub => None,
        };
        let store = match variant {
            LaunchVariant::StoreLaunch => Some(StoreTarget {
                launcher: self
                    .steam_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STEAM_PATH)),
                app_id: self.steam_app_id.clone().ok_or(LaunchError::MissingAppId)?,
            }),
            _ => None,
        };
        let title = self
            .title
            .clone()
            .or_else(|| self.game_path.as_deref().and_then(file_name_of))
            .or_else(|| wait_for.clone())
            .unwrap_or_else(|| "Slideshow".to_owned());
        Ok(LaunchParams {
            variant,
            game_path: self.game_path,
            title,
            wait_for,
            store,
            args: self.args,
            api: self.api,
        })
    }
}

impl LaunchParams {
    pub fn working_dir(&self) -> Option<&Path> {
        self.game_path.as_deref().and_then(Path::parent)
    }

    /// Command line for `steam.exe`: `-applaunch <appid>` followed by the game's own.
    pub fn store_args(&self) -> Option<String> {
        let store = self.store.as_ref()?;
        let args = format!("-applaunch {} {}", store.app_id, self.args);
        Some(args.trim_end().to_owned())
    }
}
