//! Runtime lifecycle.
//!
//! One init/teardown pair per process, called from the emitted `main`
//! prologue and epilogue. Teardown is idempotent so the uncaught-exception
//! path can run it before exiting.

/// Initialise process-wide runtime state: the SAMM program frame, the
/// exception chain, the GOSUB stack, and the DATA cursor.
#[unsafe(no_mangle)]
pub extern "C" fn basic_runtime_init() {
    crate::samm::samm_init();
    crate::except::reset();
    crate::gosub::reset();
    crate::data::reset();
}

/// Release everything: open channels, the DATA pool, the GOSUB stack, and
/// finally every SAMM frame (which frees all remaining heap roots).
#[unsafe(no_mangle)]
pub extern "C" fn basic_runtime_shutdown() {
    teardown();
}

pub(crate) fn teardown() {
    crate::io::close_all();
    crate::data::reset();
    crate::gosub::reset();
    crate::except::reset();
    crate::samm::samm_shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_shutdown_cycle_is_reentrant() {
        basic_runtime_init();
        let s = crate::string::from_str("program-lifetime");
        assert_eq!(unsafe { crate::string::to_string(s) }, "program-lifetime");
        basic_runtime_shutdown();
        // A second cycle starts clean.
        basic_runtime_init();
        assert_eq!(crate::samm::depth(), 1);
        basic_runtime_shutdown();
        basic_runtime_shutdown();
    }
}
