use crossterm::event::KeyCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Naming(String),
    Paused,
    Recording { count: usize },
}

/// What the main loop has to do after a key press or a recorded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    StartSign(String),
    Save,
    Quit,
}

/// Collection state for one run: the sign being recorded and whether frames
/// are currently being kept.
#[derive(Debug, Clone)]
pub struct Session {
    mode: Mode,
    sign: Option<String>,
    samples_per_sign: usize,
}

impl Session {
    pub fn new(samples_per_sign: usize) -> Self {
        Self {
            mode: Mode::Naming(String::new()),
            sign: None,
            samples_per_sign,
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn sign(&self) -> Option<&str> {
        self.sign.as_deref()
    }

    pub fn samples_per_sign(&self) -> usize {
        self.samples_per_sign
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.mode, Mode::Recording { .. })
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Action {
        match &mut self.mode {
            Mode::Naming(buffer) => match code {
                KeyCode::Char(c) => {
                    buffer.push(c);
                    Action::None
                }
                KeyCode::Backspace => {
                    buffer.pop();
                    Action::None
                }
                KeyCode::Enter => {
                    let name = buffer.trim().to_string();
                    if name.is_empty() {
                        return Action::None;
                    }
                    self.sign = Some(name.clone());
                    self.mode = Mode::Paused;
                    Action::StartSign(name)
                }
                KeyCode::Esc => Action::Quit,
                _ => Action::None,
            },
            Mode::Paused | Mode::Recording { .. } => match code {
                KeyCode::Char(' ') => {
                    self.mode = match self.mode {
                        Mode::Paused => Mode::Recording { count: 0 },
                        _ => Mode::Paused,
                    };
                    Action::None
                }
                KeyCode::Char('n') | KeyCode::Char('N') => {
                    self.mode = Mode::Naming(String::new());
                    Action::Save
                }
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Action::Quit,
                _ => Action::None,
            },
        }
    }

    /// Counts one kept sample. Reaching the per-sign target pauses recording.
    pub fn record(&mut self) -> bool {
        if let Mode::Recording { count } = &mut self.mode {
            *count += 1;
            if *count >= self.samples_per_sign {
                self.mode = Mode::Paused;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(session: &mut Session, name: &str) -> Action {
        for c in name.chars() {
            session.handle_key(KeyCode::Char(c));
        }
        session.handle_key(KeyCode::Enter)
    }

    #[test]
    fn test_naming() {
        let mut s = Session::new(3);
        assert_eq!(s.handle_key(KeyCode::Enter), Action::None);
        assert_eq!(s.mode(), &Mode::Naming(String::new()));

        s.handle_key(KeyCode::Char('x'));
        s.handle_key(KeyCode::Backspace);
        assert_eq!(named(&mut s, " hello "), Action::StartSign("hello".into()));
        assert_eq!(s.sign(), Some("hello"));
        assert_eq!(s.mode(), &Mode::Paused);
    }

    #[test]
    fn test_typing_q_while_naming_does_not_quit() {
        let mut s = Session::new(3);
        assert_eq!(named(&mut s, "q"), Action::StartSign("q".into()));
        assert_eq!(s.handle_key(KeyCode::Char('q')), Action::Quit);
    }

    #[test]
    fn test_toggle_and_auto_pause() {
        let mut s = Session::new(2);
        named(&mut s, "A");

        assert!(!s.record());
        s.handle_key(KeyCode::Char(' '));
        assert!(s.is_recording());
        assert!(!s.record());
        assert_eq!(s.mode(), &Mode::Recording { count: 1 });
        assert!(s.record());
        assert_eq!(s.mode(), &Mode::Paused);

        // count restarts with each recording run
        s.handle_key(KeyCode::Char(' '));
        assert_eq!(s.mode(), &Mode::Recording { count: 0 });
        s.handle_key(KeyCode::Char(' '));
        assert_eq!(s.mode(), &Mode::Paused);
    }

    #[test]
    fn test_next_sign_saves() {
        let mut s = Session::new(2);
        named(&mut s, "A");
        s.handle_key(KeyCode::Char(' '));
        assert_eq!(s.handle_key(KeyCode::Char('n')), Action::Save);
        assert_eq!(s.mode(), &Mode::Naming(String::new()));
        assert!(!s.is_recording());
    }
}
