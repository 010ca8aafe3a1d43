use super::surface::{OverlayView, SurfaceEvent};

pub const INCORRECT_FEEDBACK: &str = "Incorrect! Try again!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Hidden,
    Shown,
    Unlocked,
}

/// Input side of a lockout. Knows nothing about windows; the surface feeds it events and draws
/// whatever [LockSession::view] returns.
///
/// The only way from [LockState::Shown] to [LockState::Unlocked] is submitting a buffer that is
/// byte for byte equal to the challenge.
#[derive(Debug)]
pub struct LockSession {
    state: LockState,
    challenge: String,
    buffer: String,
    feedback: Option<&'static str>,
    failed_attempts: u32,
}

impl LockSession {
    pub fn new() -> Self {
        Self {
            state: LockState::Hidden,
            challenge: String::new(),
            buffer: String::new(),
            feedback: None,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Close and minimize must be suppressed exactly while this is true.
    pub fn requires_suppression(&self) -> bool {
        self.state == LockState::Shown
    }

    /// Hidden -> Shown. Returns false and changes nothing if a lockout is already in progress.
    pub fn show(&mut self, challenge: String) -> bool {
        if self.state != LockState::Hidden {
            return false;
        }
        self.state = LockState::Shown;
        self.challenge = challenge;
        self.buffer.clear();
        self.feedback = None;
        self.failed_attempts = 0;
        true
    }

    pub fn handle(&mut self, event: SurfaceEvent) -> LockState {
        if self.state != LockState::Shown {
            return self.state;
        }

        match event {
            SurfaceEvent::Char(c) if !c.is_control() => {
                self.buffer.push(c);
                self.feedback = None;
            }
            SurfaceEvent::Char(_) | SurfaceEvent::Blocked => {}
            SurfaceEvent::Backspace => {
                self.buffer.pop();
            }
            SurfaceEvent::Submit => {
                if self.buffer == self.challenge {
                    self.state = LockState::Unlocked;
                    self.feedback = None;
                } else {
                    self.failed_attempts += 1;
                    self.buffer.clear();
                    self.feedback = Some(INCORRECT_FEEDBACK);
                }
            }
        }
        self.state
    }

    /// Unlocked -> Hidden, once the window is gone.
    pub fn close(&mut self) {
        if self.state == LockState::Unlocked {
            self.state = LockState::Hidden;
            self.challenge.clear();
            self.buffer.clear();
        }
    }

    pub fn view(&self) -> OverlayView<'_> {
        OverlayView {
            challenge: &self.challenge,
            input: &self.buffer,
            feedback: self.feedback,
        }
    }
}

impl Default for LockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::overlay::surface::SurfaceEvent;

    use super::{LockSession, LockState, INCORRECT_FEEDBACK};

    const CHALLENGE: &str =
        "I sincerely apologize for slacking off, I will get back to writing my thesis now.";

    fn shown() -> LockSession {
        let mut session = LockSession::new();
        assert!(session.show(CHALLENGE.into()));
        session
    }

    fn type_text(session: &mut LockSession, text: &str) {
        for c in text.chars() {
            session.handle(SurfaceEvent::Char(c));
        }
    }

    #[test]
    fn exact_match_unlocks() {
        let mut session = shown();
        type_text(&mut session, CHALLENGE);
        assert_eq!(session.state(), LockState::Shown);
        assert_eq!(session.handle(SurfaceEvent::Submit), LockState::Unlocked);
        assert!(!session.requires_suppression());
        session.close();
        assert_eq!(session.state(), LockState::Hidden);
    }

    #[test]
    fn missing_period_stays_locked() {
        let mut session = shown();
        type_text(&mut session, &CHALLENGE[..CHALLENGE.len() - 1]);
        assert_eq!(session.handle(SurfaceEvent::Submit), LockState::Shown);
        assert!(session.requires_suppression());
        assert_eq!(session.view().feedback, Some(INCORRECT_FEEDBACK));
        assert_eq!(session.buffer(), "");
        assert_eq!(session.failed_attempts(), 1);
    }

    #[test]
    fn every_single_character_difference_stays_locked() {
        let mut variants = vec![
            CHALLENGE.to_uppercase(),
            CHALLENGE.to_lowercase(),
            format!("{CHALLENGE} "),
            format!(" {CHALLENGE}"),
            format!("\"{CHALLENGE}\""),
            String::new(),
        ];
        for (index, c) in CHALLENGE.char_indices() {
            let replacement = if c == 'x' { 'y' } else { 'x' };
            let mut changed = CHALLENGE.to_string();
            changed.replace_range(index..index + c.len_utf8(), &replacement.to_string());
            variants.push(changed);

            let mut dropped = CHALLENGE.to_string();
            dropped.remove(index);
            variants.push(dropped);
        }

        let mut session = shown();
        for variant in variants {
            type_text(&mut session, &variant);
            assert_eq!(
                session.handle(SurfaceEvent::Submit),
                LockState::Shown,
                "{variant:?} unlocked the overlay"
            );
        }
    }

    #[test]
    fn retries_are_unlimited() {
        let mut session = shown();
        for _ in 0..500 {
            type_text(&mut session, "let me out");
            session.handle(SurfaceEvent::Submit);
        }
        assert_eq!(session.failed_attempts(), 500);
        type_text(&mut session, CHALLENGE);
        assert_eq!(session.handle(SurfaceEvent::Submit), LockState::Unlocked);
    }

    #[test]
    fn backspace_corrects_typos() {
        let mut session = shown();
        type_text(&mut session, "I sincerly");
        for _ in 0..3 {
            session.handle(SurfaceEvent::Backspace);
        }
        assert_eq!(session.buffer(), "I since");
        type_text(&mut session, &CHALLENGE["I since".len()..]);
        assert_eq!(session.buffer(), CHALLENGE);
        assert_eq!(session.handle(SurfaceEvent::Submit), LockState::Unlocked);
    }

    #[test]
    fn escape_attempts_are_ignored() {
        let mut session = shown();
        type_text(&mut session, "I sincerely");
        session.handle(SurfaceEvent::Blocked);
        session.handle(SurfaceEvent::Char('\u{1b}'));
        session.handle(SurfaceEvent::Char('\t'));
        assert_eq!(session.buffer(), "I sincerely");
        assert_eq!(session.state(), LockState::Shown);
    }

    #[test]
    fn hidden_session_ignores_input() {
        let mut session = LockSession::new();
        assert_eq!(session.handle(SurfaceEvent::Submit), LockState::Hidden);
        assert!(!session.requires_suppression());
    }

    #[test]
    fn show_is_rejected_during_lockout() {
        let mut session = shown();
        assert!(!session.show("another challenge".into()));
        assert_eq!(session.challenge(), CHALLENGE);
    }
}
