use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// In-memory record of who is typing in which project.
///
/// A signal stays live for `window`; nothing is pushed to other clients,
/// they poll [`TypingTracker::typing_in`].
pub struct TypingTracker {
    last: Mutex<HashMap<(Uuid, Uuid), Instant>>,
    window: Duration,
}

impl TypingTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Register a typing action. Returns true if the user was not already
    /// shown as typing in the project. Expired signals of every project are
    /// dropped along the way.
    pub fn typing(&self, user_id: Uuid, project_id: Uuid) -> bool {
        self.typing_at(user_id, project_id, Instant::now())
    }

    fn typing_at(&self, user_id: Uuid, project_id: Uuid, now: Instant) -> bool {
        let mut guard = self.last.lock();
        let fresh = match guard.get(&(user_id, project_id)) {
            Some(&prev) => now.saturating_duration_since(prev) >= self.window,
            None => true,
        };
        guard.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        guard.insert((user_id, project_id), now);
        fresh
    }

    pub fn stopped(&self, user_id: Uuid, project_id: Uuid) {
        self.last.lock().remove(&(user_id, project_id));
    }

    /// Users with a live typing signal in the project. Expired signals are
    /// dropped along the way.
    pub fn typing_in(&self, project_id: Uuid) -> Vec<Uuid> {
        self.typing_in_at(project_id, Instant::now())
    }

    fn typing_in_at(&self, project_id: Uuid, now: Instant) -> Vec<Uuid> {
        let mut guard = self.last.lock();
        guard.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        let mut users: Vec<Uuid> = guard
            .keys()
            .filter(|(_, p)| *p == project_id)
            .map(|(u, _)| *u)
            .collect();
        users.sort();
        users
    }
}
