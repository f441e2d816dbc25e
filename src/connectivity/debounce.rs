/// Flips a boolean only after `required` consecutive observations agree.
/// The very first observation is taken as-is.
#[derive(Debug, Clone)]
pub struct Debouncer {
    required: u32,
    current: Option<bool>,
    candidate: bool,
    streak: u32,
}

impl Debouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            current: None,
            candidate: false,
            streak: 0,
        }
    }

    pub fn value(&self) -> bool {
        self.current.unwrap_or(false)
    }

    /// Feeds one observation. Returns the new value when it flips.
    pub fn observe(&mut self, observed: bool) -> Option<bool> {
        let Some(current) = self.current else {
            self.current = Some(observed);
            return Some(observed);
        };

        if observed == current {
            self.streak = 0;
            return None;
        }

        if self.streak > 0 && self.candidate == observed {
            self.streak += 1;
        } else {
            self.candidate = observed;
            self.streak = 1;
        }

        if self.streak >= self.required {
            self.current = Some(observed);
            self.streak = 0;
            return Some(observed);
        }
        None
    }

    /// Forces a value without waiting, e.g. when the cause is local.
    pub fn force(&mut self, value: bool) -> Option<bool> {
        self.streak = 0;
        if self.current == Some(value) {
            return None;
        }
        self.current = Some(value);
        Some(value)
    }
}
