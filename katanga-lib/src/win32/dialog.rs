use windows::{
    core::HSTRING,
    Win32::{
        Foundation::HWND,
        UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK, MB_SETFOREGROUND},
    },
};

/// Blocks until dismissed.
pub fn show_fatal_dialog(caption: &str, message: &str) {
    unsafe {
        MessageBoxW(
            HWND::default(),
            &HSTRING::from(message),
            &HSTRING::from(caption),
            MB_ICONERROR | MB_OK | MB_SETFOREGROUND,
        )
    };
}
