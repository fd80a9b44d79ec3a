//! Implementation details for the [`profile`](crate::profile) macro

use parking_lot::Mutex;
use std::error::Error;
use std::io;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Global [`Profiler`] collecting the timings of all pipeline stages
pub static PROFILER: LazyLock<Mutex<Profiler>> = LazyLock::new(Default::default);

/// Implementation of the profile macro, use [`profile`](crate::profile) instead
#[doc(hidden)]
#[macro_export]
macro_rules! profile_impl {
    ($name:expr) => {
        let _profiling_scope_guard = $crate::profiling::PROFILER.lock().enter($name);
    };
}

/// A scope guard recording the elapsed time of the scope
pub struct Guard {
    enter_time: Instant,
}

/// Dropping a `Guard` adds its elapsed time to the innermost open scope
impl Drop for Guard {
    fn drop(&mut self) {
        PROFILER.lock().leave(self.enter_time.elapsed())
    }
}

#[derive(Clone, Debug)]
struct Scope {
    name: &'static str,
    parent: Option<usize>,
    num_calls: usize,
    duration_sum: Duration,
}

/// Profiler storing all scopes in order of their first call and the stack of currently open scopes
#[derive(Default)]
pub struct Profiler {
    scopes: Vec<Scope>,
    scope_stack: Vec<usize>,
}

impl Profiler {
    /// Resets all profiling data
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.scope_stack.clear();
    }

    /// Enters a scope with the given name as a child of the scope on top of the stack
    pub fn enter(&mut self, name: &'static str) -> Guard {
        self.push_scope(name);
        Guard {
            enter_time: Instant::now(),
        }
    }

    fn push_scope(&mut self, name: &'static str) {
        let parent = self.scope_stack.last().copied();
        let index = match self
            .scopes
            .iter()
            .position(|s| s.name == name && s.parent == parent)
        {
            Some(index) => index,
            None => {
                self.scopes.push(Scope {
                    name,
                    parent,
                    num_calls: 0,
                    duration_sum: Duration::default(),
                });
                self.scopes.len() - 1
            }
        };

        self.scope_stack.push(index);
    }

    fn leave(&mut self, duration: Duration) {
        if let Some(index) = self.scope_stack.pop() {
            let scope = &mut self.scopes[index];
            scope.num_calls += 1;
            scope.duration_sum += duration;
        }
    }

    fn write_recursively<W: io::Write>(
        &self,
        out: &mut W,
        index: usize,
        parent_duration: Option<Duration>,
        depth: usize,
    ) -> io::Result<()> {
        let scope = &self.scopes[index];
        let duration_secs = scope.duration_sum.as_secs_f64();
        let parent_secs = parent_duration.map_or(duration_secs, |d| d.as_secs_f64());
        let percent = if parent_secs > 0.0 {
            duration_secs / parent_secs * 100.0
        } else {
            100.0
        };

        writeln!(
            out,
            "{:indent$}{}: {:3.2}%, {:>4.2}ms avg, {} {} (total: {:.3}s)",
            "",
            scope.name,
            percent,
            duration_secs * 1000.0 / (scope.num_calls.max(1) as f64),
            scope.num_calls,
            if scope.num_calls > 1 { "calls" } else { "call" },
            duration_secs,
            indent = 2 * depth
        )?;

        for (child, _) in self
            .scopes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent == Some(index))
        {
            self.write_recursively(out, child, Some(scope.duration_sum), depth + 1)?;
        }

        Ok(())
    }
}

/// Pretty prints the collected profiling data to the given writer
pub fn write<W: io::Write>(out: &mut W) -> io::Result<()> {
    let profiler = PROFILER.lock();
    for (root, _) in profiler
        .scopes
        .iter()
        .enumerate()
        .filter(|(_, s)| s.parent.is_none())
    {
        profiler.write_recursively(out, root, None, 0)?;
    }
    Ok(())
}

/// Returns the pretty printed output of the collected profiling data as a `String`
pub fn write_to_string() -> Result<String, Box<dyn Error>> {
    let mut buffer = Vec::new();
    write(&mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Resets the collected profiling data, should be called outside of any scope
pub fn reset() {
    PROFILER.lock().reset();
}
