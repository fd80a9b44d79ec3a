//! Provides the [`profile`](crate::profile) macro or a dummy implementation depending on the selected feature

#[cfg(feature = "profiling")]
/// Creates a named scope for profiling
///
/// The macro stores a scope guard in a local variable called `_profiling_scope_guard`. When the
/// guard is dropped, the elapsed time is added to the [`Profiler`](crate::profiling::Profiler)
/// in the static [`PROFILER`](static@crate::profiling::PROFILER) variable. Scopes opened while
/// another scope is still alive become its children, so the timings of a pipeline run are
/// collected as a hierarchy:
/// ```text
/// preprocessing: 100.00%, 812.31ms avg, 1 call (total: 0.812s)
///   distance: 41.22%, 334.87ms avg, 1 call (total: 0.335s)
///   embeddings: 55.03%, 447.02ms avg, 1 call (total: 0.447s)
/// ```
/// Use [`write`](crate::profiling::write) to print the collected timings.
///
/// The profiler keeps a single scope stack, scopes should only be opened from the thread driving
/// the pipeline and never from inside of a rayon closure.
#[macro_export]
#[cfg_attr(docsrs, doc(cfg(feature = "profiling")))]
macro_rules! profile {
    ($name:expr) => {
        $crate::profile_impl!($name);
    };
}

#[cfg(not(feature = "profiling"))]
/// No-op macro if profiling is disabled
#[macro_export]
macro_rules! profile {
    ($name:expr) => {};
}
