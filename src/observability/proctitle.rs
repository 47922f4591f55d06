//! Process title, where the platform lets us set one.

/// Set the name shown by `ps`/`top`. Linux truncates it to 15 bytes.
#[cfg(target_os = "linux")]
pub fn set_title(title: &str) {
    let Ok(name) = std::ffi::CString::new(title.replace('\0', "")) else {
        return;
    };
    if let Err(e) = nix::sys::prctl::set_name(&name) {
        tracing::debug!(error = %e, "Could not set process title");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_title(_title: &str) {}
