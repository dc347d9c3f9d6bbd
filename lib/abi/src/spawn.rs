//! `spawn_function`: memoizes one task-kind descriptor per distinct
//! `(fn_ptr, label)` pair behind a spin lock, so repeated spawns of the
//! same function/label reuse one registration rather than allocating a
//! fresh descriptor every call (grounded in the reference's
//! `SpawnFunction.cpp`).

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::sync::{Arc, OnceLock};

use depcore::sync::SpinLock;

pub type SpawnedFn = extern "C" fn(*mut c_void);

/// The memoized descriptor for one `(function, label)` pair. Opaque to
/// the caller beyond its pointer identity: two spawns with the same
/// function and label always see the same `TaskKindDescriptor` address.
pub struct TaskKindDescriptor {
    pub function: SpawnedFn,
    pub label: String,
}

type Registry = HashMap<(usize, String), Arc<TaskKindDescriptor>>;

static REGISTRY: OnceLock<SpinLock<Registry>> = OnceLock::new();

fn registry() -> &'static SpinLock<Registry> {
    REGISTRY.get_or_init(|| SpinLock::new(HashMap::new()))
}

/// Returns the memoized descriptor for `(function, label)`, creating one
/// on first sight. `label` may be null, treated as the empty string.
///
/// # Safety
/// `label` must be either null or point at a valid, nul-terminated C
/// string for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn spawn_function(function: SpawnedFn, label: *const c_char) -> *const TaskKindDescriptor {
    let label = if label.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(label) }.to_string_lossy().into_owned()
    };
    let key = (function as usize, label.clone());
    let mut registry = registry().lock();
    let descriptor = registry
        .entry(key)
        .or_insert_with(|| Arc::new(TaskKindDescriptor { function, label }))
        .clone();
    // The registry holds a permanent `Arc`, so the pointee outlives this
    // call; the raw pointer is a stable identity, not a transferred
    // ownership handle the caller must ever free.
    Arc::as_ptr(&descriptor)
}
