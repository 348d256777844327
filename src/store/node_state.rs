use crate::role::{Role, RoleSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;

/// NodeState holds the role and alone flag that the store consults on every request and the role
/// state machine rewrites on every identification pass. Every change is published to
/// `RoleListener`s.
pub(crate) struct NodeState {
    role: RwLock<Role>,
    alone: AtomicBool,
    notifier: watch::Sender<RoleSnapshot>,
    // Keeps the channel open even when no external listener exists.
    _listener: watch::Receiver<RoleSnapshot>,
}

impl NodeState {
    pub(crate) fn new_spare() -> Self {
        let initial = RoleSnapshot {
            role: Role::Spare,
            alone: false,
        };
        let (notifier, listener) = watch::channel(initial);

        NodeState {
            role: RwLock::new(initial.role),
            alone: AtomicBool::new(initial.alone),
            notifier,
            _listener: listener,
        }
    }

    pub(crate) fn role(&self) -> Role {
        *self.role.read().expect("NodeState.role() lock poison")
    }

    pub(crate) fn is_alone(&self) -> bool {
        self.alone.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            role: self.role(),
            alone: self.is_alone(),
        }
    }

    /// Returns the previous role.
    pub(crate) fn set_role(&self, new_role: Role) -> Role {
        let previous = {
            let mut role = self.role.write().expect("NodeState.set_role() lock poison");
            std::mem::replace(&mut *role, new_role)
        };
        self.publish();
        previous
    }

    /// Returns the previous value of the flag.
    pub(crate) fn set_alone(&self, alone: bool) -> bool {
        let previous = self.alone.swap(alone, Ordering::AcqRel);
        if previous != alone {
            self.publish();
        }
        previous
    }

    pub(crate) fn listener(&self) -> RoleListener {
        RoleListener {
            rcv: self.notifier.subscribe(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        if *self.notifier.borrow() != snapshot {
            let _ = self.notifier.send(snapshot);
        }
    }
}

/// RoleListener observes role changes of a local node. Like any watch channel it doesn't queue
/// intermediate values: several changes between two awaits collapse into the latest one.
#[derive(Clone)]
pub struct RoleListener {
    rcv: watch::Receiver<RoleSnapshot>,
}

impl RoleListener {
    pub fn current(&self) -> RoleSnapshot {
        *self.rcv.borrow()
    }

    /// `next()` waits for the next change and returns the latest snapshot, or `None` once the
    /// node has been dropped.
    pub async fn next(&mut self) -> Option<RoleSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }

    /// `wait_for()` resolves with the first snapshot (current one included) that satisfies
    /// `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<RoleSnapshot>
    where
        F: FnMut(&RoleSnapshot) -> bool,
    {
        let current = self.current();
        if predicate(&current) {
            return Some(current);
        }
        loop {
            let snapshot = self.next().await?;
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
    }
}
