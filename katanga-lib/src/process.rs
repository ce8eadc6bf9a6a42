use std::{fmt, path::Path};

use getset::{CopyGetters, Getters};

use crate::{error::LaunchError, hooks::ArmedHooks, launch_params::LaunchVariant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bitness {
    X86,
    X64,
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bitness::X86 => "32-bit",
            Bitness::X64 => "64-bit",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Exited,
}

/// The primary thread of a process created suspended. Consumed exactly once
/// by [`ArmedHooks::resume`].
#[derive(Debug, PartialEq, Eq)]
pub struct ResumeToken {
    raw_thread: usize,
}

impl ResumeToken {
    pub fn new(raw_thread: usize) -> Self {
        Self { raw_thread }
    }

    pub fn raw_thread(&self) -> usize {
        self.raw_thread
    }
}

#[derive(Debug)]
pub struct SuspendedChild {
    pub pid: u32,
    pub token: ResumeToken,
}

#[derive(CopyGetters, Getters, Debug)]
pub struct TargetProcess {
    #[getset(get_copy = "pub")]
    pid: u32,
    #[getset(get_copy = "pub")]
    bitness: Bitness,
    /// File name used to look the process up again, e.g. `Game.exe`.
    #[getset(get = "pub")]
    exe_name: String,
    #[getset(get_copy = "pub")]
    variant: LaunchVariant,
    #[getset(get_copy = "pub")]
    liveness: Liveness,
    resume_token: Option<ResumeToken>,
}

impl TargetProcess {
    pub fn running(pid: u32, bitness: Bitness, exe_name: String, variant: LaunchVariant) -> Self {
        Self {
            pid,
            bitness,
            exe_name,
            variant,
            liveness: Liveness::Running,
            resume_token: None,
        }
    }

    pub fn suspended(child: SuspendedChild, bitness: Bitness, exe_name: String) -> Self {
        Self {
            pid: child.pid,
            bitness,
            exe_name,
            variant: LaunchVariant::SuspendedLaunch,
            liveness: Liveness::Running,
            resume_token: Some(child.token),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.resume_token.is_some()
    }

    pub(crate) fn take_resume_token(&mut self) -> Option<ResumeToken> {
        self.resume_token.take()
    }

    pub fn mark_exited(&mut self) {
        self.liveness = Liveness::Exited;
    }
}

/// OS process operations the launcher and the exit watch depend on.
pub trait ProcessControl {
    fn create_suspended(
        &mut self,
        exe: &Path,
        args: &str,
        working_dir: &Path,
    ) -> Result<SuspendedChild, LaunchError>;

    /// Starts `program` without keeping any handle to it. `args` is passed
    /// through verbatim.
    fn spawn_detached(
        &mut self,
        program: &Path,
        args: &str,
        working_dir: &Path,
    ) -> Result<(), LaunchError>;

    fn find_process_id(&self, exe_name: &str) -> Option<u32>;

    fn bitness(&self, pid: u32) -> Result<Bitness, LaunchError>;

    /// Only reachable through [`ArmedHooks::resume`].
    fn resume(&mut self, token: ResumeToken, armed: &ArmedHooks) -> Result<(), LaunchError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{
        cell::RefCell,
        collections::HashMap,
        path::{Path, PathBuf},
    };

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        CreateSuspended(PathBuf, String, PathBuf),
        SpawnDetached(PathBuf, String, PathBuf),
        Find(String),
        Resume(usize, usize),
    }

    #[derive(Default)]
    pub struct FakeProcesses {
        pub running: HashMap<String, u32>,
        pub bitness: HashMap<u32, Bitness>,
        pub fail_create: Option<u32>,
        pub next_pid: u32,
        pub calls: RefCell<Vec<Call>>,
    }

    impl FakeProcesses {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl ProcessControl for FakeProcesses {
        fn create_suspended(
            &mut self,
            exe: &Path,
            args: &str,
            working_dir: &Path,
        ) -> Result<SuspendedChild, LaunchError> {
            self.calls.borrow_mut().push(Call::CreateSuspended(
                exe.to_owned(),
                args.to_owned(),
                working_dir.to_owned(),
            ));
            if let Some(code) = self.fail_create {
                return Err(LaunchError::CreateProcess {
                    path: exe.to_owned(),
                    code,
                });
            }
            let pid = self.next_pid;
            Ok(SuspendedChild {
                pid,
                token: ResumeToken::new(pid as usize + 1),
            })
        }

        fn spawn_detached(
            &mut self,
            program: &Path,
            args: &str,
            working_dir: &Path,
        ) -> Result<(), LaunchError> {
            self.calls.borrow_mut().push(Call::SpawnDetached(
                program.to_owned(),
                args.to_owned(),
                working_dir.to_owned(),
            ));
            if let Some(code) = self.fail_create {
                return Err(LaunchError::CreateProcess {
                    path: program.to_owned(),
                    code,
                });
            }
            Ok(())
        }

        fn find_process_id(&self, exe_name: &str) -> Option<u32> {
            self.calls
                .borrow_mut()
                .push(Call::Find(exe_name.to_owned()));
            self.running.get(exe_name).copied()
        }

        fn bitness(&self, pid: u32) -> Result<Bitness, LaunchError> {
            Ok(self.bitness.get(&pid).copied().unwrap_or(Bitness::X64))
        }

        fn resume(&mut self, token: ResumeToken, armed: &ArmedHooks) -> Result<(), LaunchError> {
            self.calls
                .borrow_mut()
                .push(Call::Resume(token.raw_thread(), armed.len()));
            Ok(())
        }
    }
}
