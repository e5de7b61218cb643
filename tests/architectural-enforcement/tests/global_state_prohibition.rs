//! Global State Prohibition
//!
//! **Policy**: the gateway has no process-wide registries. Managers,
//! Providers and Clients are explicit values passed to whoever needs them,
//! so the core crates declare no mutable or lazily initialized statics.

use architectural_enforcement::{code_part, production_sources};

/// Declarations that introduce ambient mutable state
const FORBIDDEN: &[&str] = &[
    "static mut ",
    "lazy_static!",
    "thread_local!",
    "once_cell::",
    "OnceLock<",
    "OnceCell<",
    "LazyLock<",
    "Lazy<",
];

fn is_violation(code: &str) -> bool {
    let trimmed = code.trim_start();
    if FORBIDDEN[..4].iter().any(|p| trimmed.contains(p)) {
        return true;
    }
    let declares_static = trimmed.starts_with("static ")
        || trimmed.starts_with("pub static ")
        || trimmed.starts_with("pub(crate) static ");
    declares_static
        && (FORBIDDEN[4..].iter().any(|p| trimmed.contains(p))
            || trimmed.contains("Mutex<")
            || trimmed.contains("RwLock<")
            || trimmed.contains("Atomic"))
}

#[test]
fn test_no_global_mutable_state() {
    let mut violations = Vec::new();
    for file in production_sources() {
        for (number, line) in &file.lines {
            if is_violation(code_part(line)) {
                violations.push(file.violation(*number, line));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "\nGlobal mutable state in production code:\n  {}\n\
         Pass an explicit instance (e.g. Arc<Manager>) instead.\n",
        violations.join("\n  ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector() {
        assert!(is_violation("static mut REGISTRY: Vec<u8> = Vec::new();"));
        assert!(is_violation("static MANAGER: OnceLock<Manager> = OnceLock::new();"));
        assert!(is_violation("pub static COUNT: AtomicUsize = AtomicUsize::new(0);"));
        assert!(is_violation("lazy_static! {"));
        assert!(!is_violation("const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);"));
        assert!(!is_violation("pub fn name(&self) -> &'static str {"));
        assert!(!is_violation("let cell = OnceLock::new();"));
    }
}
