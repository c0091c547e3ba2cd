//! Registration extension points.
//!
//! Registering middleware never pushes onto a stack directly. [`App`] and
//! [`Router`] hand each registration to an *extension point*: a swappable
//! implementation of "add this middleware". Out of the box the implementation
//! just inserts. Instrumentation patches the points so everything registered
//! afterwards is transparently substituted, without user code threading a
//! handle around.
//!
//! ```text
//! app.middleware(auth)
//!        ↓
//! hooks.use_point().current()(&mut stack, auth)   ← original: stack.push(auth)
//!                                                 ← patched:  original(stack, wrap(auth))
//! ```
//!
//! Every patch records the implementation it replaced. [`Hooks::reverse`]
//! restores them last-in first-out, leaving each point holding the very `Arc`
//! it held before.
//!
//! [`App`]: crate::App
//! [`Router`]: crate::Router

use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::middleware::SharedMiddleware;
use crate::router::{Registration, RouteTable};

/// Implementation behind application-level middleware registration.
pub type UseFn = dyn Fn(&mut Vec<SharedMiddleware>, SharedMiddleware) + Send + Sync;

/// Implementation behind router registration.
pub type RegisterFn = dyn Fn(&mut RouteTable, Registration) + Send + Sync;

static GLOBAL: LazyLock<Arc<Hooks>> = LazyLock::new(|| Arc::new(Hooks::new()));

// ── ExtensionPoint ────────────────────────────────────────────────────────────

/// A named slot holding the current implementation of one registration hook.
pub struct ExtensionPoint<F: ?Sized> {
    name: &'static str,
    current: RwLock<Arc<F>>,
}

impl<F: ?Sized> ExtensionPoint<F> {
    fn new(name: &'static str, implementation: Arc<F>) -> Self {
        Self { name, current: RwLock::new(implementation) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The implementation registrations currently go through.
    pub fn current(&self) -> Arc<F> {
        Arc::clone(&self.current.read())
    }

    /// Installs `build(original)` and returns the original.
    fn patch(&self, build: impl FnOnce(Arc<F>) -> Arc<F>) -> Arc<F> {
        let mut current = self.current.write();
        let original = Arc::clone(&current);
        *current = build(Arc::clone(&original));
        original
    }

    fn restore(&self, original: Arc<F>) {
        *self.current.write() = original;
    }
}

/// What a patch replaced, kept so the patch can be undone.
enum PatchRecord {
    Use(Arc<UseFn>),
    Register(Arc<RegisterFn>),
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// The set of extension points a host exposes, plus the patches applied to them.
///
/// [`Hooks::global`] is the process-wide instance [`App::new`](crate::App::new)
/// and [`Router::new`](crate::Router::new) use. Hosts and tests that want
/// isolation create their own and pass it to `with_hooks`.
pub struct Hooks {
    use_point: Option<ExtensionPoint<UseFn>>,
    register_point: Option<ExtensionPoint<RegisterFn>>,
    patches: Mutex<Vec<PatchRecord>>,
}

impl Hooks {
    /// Application and router extension points, both unpatched.
    pub fn new() -> Self {
        Self::with_points(true, true)
    }

    /// Only the application extension point; router registrations insert directly.
    pub fn without_router() -> Self {
        Self::with_points(true, false)
    }

    /// No extension points at all; every registration inserts directly.
    pub fn detached() -> Self {
        Self::with_points(false, false)
    }

    fn with_points(app: bool, router: bool) -> Self {
        let use_point = app.then(|| {
            let push: Arc<UseFn> = Arc::new(|stack: &mut Vec<SharedMiddleware>, middleware: SharedMiddleware| stack.push(middleware));
            ExtensionPoint::new("application", push)
        });
        let register_point = router.then(|| {
            let insert: Arc<RegisterFn> = Arc::new(|table: &mut RouteTable, registration: Registration| table.insert(registration));
            ExtensionPoint::new("router", insert)
        });
        Self { use_point, register_point, patches: Mutex::new(Vec::new()) }
    }

    pub fn global() -> Arc<Hooks> {
        Arc::clone(&GLOBAL)
    }

    pub fn use_point(&self) -> Option<&ExtensionPoint<UseFn>> {
        self.use_point.as_ref()
    }

    pub fn register_point(&self) -> Option<&ExtensionPoint<RegisterFn>> {
        self.register_point.as_ref()
    }

    /// Number of patches currently in force.
    pub fn active_patches(&self) -> usize {
        self.patches.lock().len()
    }

    /// Patches the application point. Returns `false` if the host has none.
    pub(crate) fn patch_use(&self, build: impl FnOnce(Arc<UseFn>) -> Arc<UseFn>) -> bool {
        let Some(point) = &self.use_point else { return false };
        let mut patches = self.patches.lock();
        patches.push(PatchRecord::Use(point.patch(build)));
        debug!(point = point.name(), "extension point patched");
        true
    }

    /// Patches the router point. Returns `false` if the host has none.
    pub(crate) fn patch_register(&self, build: impl FnOnce(Arc<RegisterFn>) -> Arc<RegisterFn>) -> bool {
        let Some(point) = &self.register_point else { return false };
        let mut patches = self.patches.lock();
        patches.push(PatchRecord::Register(point.patch(build)));
        debug!(point = point.name(), "extension point patched");
        true
    }

    /// Undoes every patch, newest first.
    pub fn reverse(&self) {
        let mut patches = self.patches.lock();
        let count = patches.len();
        while let Some(record) = patches.pop() {
            match (record, &self.use_point, &self.register_point) {
                (PatchRecord::Use(original), Some(point), _) => point.restore(original),
                (PatchRecord::Register(original), _, Some(point)) => point.restore(original),
                // a record only exists for a point that was present
                _ => {}
            }
        }
        if count > 0 {
            debug!(count, "extension point patches reversed");
        }
    }

    // ── Registration entry points ─────────────────────────────────────────────

    pub(crate) fn register_middleware(&self, stack: &mut Vec<SharedMiddleware>, middleware: SharedMiddleware) {
        match &self.use_point {
            Some(point) => (point.current())(stack, middleware),
            None => stack.push(middleware),
        }
    }

    pub(crate) fn register_route(&self, table: &mut RouteTable, registration: Registration) {
        match &self.register_point {
            Some(point) => (point.current())(table, registration),
            None => table.insert(registration),
        }
    }
}

impl Default for Hooks {
    fn default() -> Self { Self::new() }
}
