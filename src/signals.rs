use tokio::sync::watch;

use crate::config::IdleLight;

/// Cross-task flags shared by the gateway, the rating monitor, and the idle-light task.
pub struct FocusSignals {
    focus_active: watch::Sender<bool>,
    idle_light: watch::Sender<IdleLight>,
}

impl FocusSignals {
    pub fn new(idle: IdleLight) -> Self {
        let (focus_active, _) = watch::channel(false);
        let (idle_light, _) = watch::channel(idle);
        Self {
            focus_active,
            idle_light,
        }
    }

    pub fn is_focus_active(&self) -> bool {
        *self.focus_active.borrow()
    }

    /// Returns the previous value.
    pub fn set_focus_active(&self, active: bool) -> bool {
        let mut previous = active;
        self.focus_active.send_if_modified(|current| {
            previous = *current;
            if *current == active {
                return false;
            }
            *current = active;
            true
        });
        previous
    }

    pub fn subscribe_focus_active(&self) -> watch::Receiver<bool> {
        self.focus_active.subscribe()
    }

    pub fn idle_light(&self) -> IdleLight {
        *self.idle_light.borrow()
    }

    pub fn set_idle_light(&self, light: IdleLight) {
        self.idle_light.send_if_modified(|current| {
            if *current == light {
                return false;
            }
            *current = light;
            true
        });
    }

    pub fn subscribe_idle_light(&self) -> watch::Receiver<IdleLight> {
        self.idle_light.subscribe()
    }
}
