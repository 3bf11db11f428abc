//! Warnings for the person running a lock, printed to stderr next to the `tracing` log.
//!
//! Warnings are off until [`enable`] is called, so library consumers that render their own
//! diagnostics see nothing.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

use owo_colors::OwoColorize;
use rustc_hash::FxHashSet;

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Messages already shown by [`warn_user_once`].
static SHOWN: LazyLock<Mutex<FxHashSet<String>>> = LazyLock::new(Mutex::default);

/// Show warnings from here on.
pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Stop showing warnings.
pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Print `message` if warnings are enabled and, when `once` is set, it wasn't shown before.
#[doc(hidden)]
pub fn emit(message: &str, once: bool) {
    if !is_enabled() {
        return;
    }
    if once && !first_sighting(message) {
        return;
    }
    anstream::eprintln!("{}", render(message));
}

/// Whether `message` is new to [`warn_user_once`], recording it if so.
fn first_sighting(message: &str) -> bool {
    SHOWN
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(message.to_string())
}

fn render(message: &str) -> String {
    let mut rendered = format!("{}{}", "warning".yellow().bold(), ":".bold());
    let mut lines = message.lines();
    let _ = write!(rendered, " {}", lines.next().unwrap_or_default().bold());
    for line in lines {
        let _ = write!(rendered, "\n         {line}");
    }
    rendered
}

/// Warn the user, if warnings are enabled.
#[macro_export]
macro_rules! warn_user {
    ($($arg:tt)*) => {
        $crate::emit(&format!($($arg)*), false)
    };
}

/// Warn the user once per distinct message, if warnings are enabled.
#[macro_export]
macro_rules! warn_user_once {
    ($($arg:tt)*) => {
        $crate::emit(&format!($($arg)*), true)
    };
}
