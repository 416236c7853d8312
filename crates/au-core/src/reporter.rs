//! Result reporting: last-result and first-error tracking with optional logging
//!
//! Setup and control code reports every outcome; real-time code reports only
//! failures, so the successful hot path stays allocation-free.

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{ResultId, ResultRecord};

/// Which result classes get forwarded to the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Nothing is logged.
    Quiet,
    /// Only errors.
    Errors,
    /// Errors and warnings.
    Warnings,
    /// Everything, including `Ok`.
    All,
}

impl Verbosity {
    fn accepts(self, id: ResultId) -> bool {
        match self {
            Verbosity::Quiet => false,
            Verbosity::Errors => id.is_error(),
            Verbosity::Warnings => id.is_error() || id == ResultId::Warning,
            Verbosity::All => true,
        }
    }
}

/// Behaviour on a failed precondition assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssertMode {
    /// Record nothing, continue.
    Ignore,
    /// Record and continue.
    #[default]
    Continue,
    /// Panic on failed asserts.
    AbortOnAssert,
    /// Panic on any reported error.
    AbortOnError,
}

/// Per-core result reporter.
///
/// Keeps the most recent record and the first error since the last reset,
/// both queryable. Not shared across threads; each control thread owns one
/// (the real-time path reports through the thread-local shim).
#[derive(Debug)]
pub struct Reporter {
    last: Option<ResultRecord>,
    first_error: Option<ResultRecord>,
    verbosity: Verbosity,
    assert_mode: AssertMode,
    sink: Option<File>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            last: None,
            first_error: None,
            verbosity: Verbosity::Errors,
            assert_mode: AssertMode::Continue,
            sink: None,
        }
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn set_assert_mode(&mut self, mode: AssertMode) {
        self.assert_mode = mode;
    }

    /// Route accepted records to a file in addition to the `log` facade.
    pub fn log_to_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<()> {
        self.sink = Some(File::create(path)?);
        Ok(())
    }

    pub fn report(&mut self, record: ResultRecord) {
        if self.verbosity.accepts(record.id) {
            let line = format!(
                "{:?}: {} ({}) at {}:{}",
                record.id, record.description, record.suggestion, record.file, record.line
            );
            if record.id.is_error() {
                log::error!("{line}");
            } else if record.id == ResultId::Warning {
                log::warn!("{line}");
            } else {
                log::debug!("{line}");
            }
            if let Some(sink) = &mut self.sink {
                let _ = writeln!(sink, "{line}");
            }
        }

        if record.id.is_error() && self.first_error.is_none() {
            self.first_error = Some(record.clone());
        }
        let abort = record.id.is_error() && self.assert_mode == AssertMode::AbortOnError;
        self.last = Some(record);
        if abort {
            panic!(
                "aborting on reported error: {:?}",
                self.last.as_ref().unwrap()
            );
        }
    }

    /// Record a failed precondition, honouring the assert mode.
    pub fn report_assert(&mut self, record: ResultRecord) {
        match self.assert_mode {
            AssertMode::Ignore => {}
            AssertMode::Continue => self.report(record),
            AssertMode::AbortOnAssert | AssertMode::AbortOnError => {
                panic!("assertion failed: {record:?}");
            }
        }
    }

    pub fn last_result(&self) -> Option<&ResultRecord> {
        self.last.as_ref()
    }

    pub fn first_error(&self) -> Option<&ResultRecord> {
        self.first_error.as_ref()
    }

    pub fn reset_errors(&mut self) {
        self.first_error = None;
        self.last = None;
    }
}

thread_local! {
    static REPORTER: RefCell<Reporter> = RefCell::new(Reporter::new());
}

/// Run `f` against this thread's default reporter.
pub fn with_reporter<R>(f: impl FnOnce(&mut Reporter) -> R) -> R {
    REPORTER.with(|r| f(&mut r.borrow_mut()))
}

/// Report a record through the thread-local reporter.
#[macro_export]
macro_rules! report {
    ($id:expr, $desc:expr) => {
        $crate::report!($id, $desc, "")
    };
    ($id:expr, $desc:expr, $sugg:expr) => {
        $crate::reporter::with_reporter(|r| {
            r.report($crate::error::ResultRecord::new(
                $id,
                $desc,
                $sugg,
                file!(),
                line!(),
            ))
        })
    };
}

/// Check a precondition; on failure report it and evaluate to `false`.
#[macro_export]
macro_rules! dsp_assert {
    ($cond:expr, $id:expr, $desc:expr) => {{
        let ok = $cond;
        if !ok {
            $crate::reporter::with_reporter(|r| {
                r.report_assert($crate::error::ResultRecord::new(
                    $id,
                    $desc,
                    "",
                    file!(),
                    line!(),
                ))
            });
        }
        ok
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_sticks() {
        let mut reporter = Reporter::new();
        reporter.report(ResultRecord::new(ResultId::Ok, "setup", "", file!(), line!()));
        assert!(reporter.first_error().is_none());

        reporter.report(ResultRecord::new(
            ResultId::BadSize,
            "first",
            "",
            file!(),
            line!(),
        ));
        reporter.report(ResultRecord::new(
            ResultId::NotSet,
            "second",
            "",
            file!(),
            line!(),
        ));

        assert_eq!(reporter.first_error().unwrap().description, "first");
        assert_eq!(reporter.last_result().unwrap().id, ResultId::NotSet);
    }

    #[test]
    fn test_reset_clears_slots() {
        let mut reporter = Reporter::new();
        reporter.report(ResultRecord::new(
            ResultId::BadSize,
            "oops",
            "",
            file!(),
            line!(),
        ));
        reporter.reset_errors();
        assert!(reporter.first_error().is_none());
        assert!(reporter.last_result().is_none());
    }

    #[test]
    #[should_panic]
    fn test_abort_on_assert() {
        let mut reporter = Reporter::new();
        reporter.set_assert_mode(AssertMode::AbortOnAssert);
        reporter.report_assert(ResultRecord::new(
            ResultId::BadSize,
            "bad",
            "",
            file!(),
            line!(),
        ));
    }

    #[test]
    fn test_thread_local_macro() {
        crate::report!(ResultId::Warning, "buffer zeroed");
        with_reporter(|r| {
            assert_eq!(r.last_result().unwrap().id, ResultId::Warning);
            r.reset_errors();
        });
    }
}
