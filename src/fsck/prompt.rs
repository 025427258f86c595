use std::io::{BufRead, ErrorKind, Write};

use crate::signal::{self, Latch};
use crate::{Error, Result};

/// How repair questions get answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// Every question answered no, nothing gets written
    No,
    Yes,
    /// Read answers from the operator
    Ask,
}

pub struct Prompter<'a> {
    mode: Answer,
    input: &'a mut dyn BufRead,
    asked: bool,
    /// Where termination signals get latched
    signals: &'static Latch,
}

impl<'a> Prompter<'a> {
    pub fn new(mode: Answer, input: &'a mut dyn BufRead) -> Self {
        Self {
            mode,
            input,
            asked: false,
            signals: &signal::PENDING,
        }
    }

    /// Whether any question was put so far
    pub fn asked(&self) -> bool {
        self.asked
    }

    /// Put `question` and return the answer. A termination signal that
    /// arrives before the answer is acted on wins over the answer.
    pub fn reply(&mut self, out: &mut dyn Write, question: &str) -> Result<bool> {
        self.asked = true;
        write!(out, "\n{question}? ")?;
        let answer = match self.mode {
            Answer::No => {
                write!(out, " no\n\n")?;
                false
            }
            Answer::Yes => {
                write!(out, " yes\n\n")?;
                true
            }
            Answer::Ask => loop {
                out.flush()?;
                let line = self.read_answer()?;
                writeln!(out)?;
                match line.chars().next() {
                    Some('y' | 'Y') => break true,
                    Some('n' | 'N') => break false,
                    _ => writeln!(out, "Answer 'y' or 'n' (yes or no)")?,
                }
            },
        };
        self.check_signal()?;
        Ok(answer)
    }

    fn check_signal(&self) -> Result<()> {
        match self.signals.get() {
            Some(signal) => Err(Error::Interrupted(signal)),
            None => Ok(()),
        }
    }

    /// One line of input, given up on when a signal interrupts the read
    fn read_answer(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            self.check_signal()?;
            let available = match self.input.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if available.is_empty() {
                break;
            }
            let (taken, done) = match available.iter().position(|&b| b == b'\n') {
                Some(at) => (at + 1, true),
                None => (available.len(), false),
            };
            line.extend_from_slice(&available[..taken]);
            self.input.consume(taken);
            if done {
                break;
            }
        }
        if line.is_empty() {
            return Err(Error::Aborted("end of input".into()));
        }
        Ok(String::from_utf8_lossy(&line)
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(79)
            .collect())
    }
}

impl std::fmt::Debug for Prompter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompter")
            .field("mode", &self.mode)
            .field("asked", &self.asked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;

    #[test]
    fn fixed_answers() {
        let mut input = std::io::empty();
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::No, &mut input);
        assert![!prompter.asked()];
        assert_eq![prompter.reply(&mut out, "CLEAR").unwrap(), false];
        assert![prompter.asked()];
        assert_eq![String::from_utf8(out).unwrap(), "\nCLEAR?  no\n\n"];

        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Yes, &mut input);
        assert_eq![prompter.reply(&mut out, "FIX").unwrap(), true];
        assert_eq![String::from_utf8(out).unwrap(), "\nFIX?  yes\n\n"];
    }

    #[test]
    fn operator_answers() {
        let mut input = Cursor::new(b"maybe\n\n  y es\nNo\n".to_vec());
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Ask, &mut input);
        assert_eq![prompter.reply(&mut out, "SALVAGE").unwrap(), true];
        assert_eq![prompter.reply(&mut out, "REMOVE").unwrap(), false];
        let text = String::from_utf8(out).unwrap();
        assert_eq![text.matches("Answer 'y' or 'n' (yes or no)").count(), 2];
    }

    /// Input that gets interrupted by `signal` before any data arrives
    struct Interrupting {
        signals: &'static Latch,
        signal: Option<i32>,
        data: Cursor<Vec<u8>>,
    }

    impl Read for Interrupting {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.data.read(buf)
        }
    }

    impl BufRead for Interrupting {
        fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
            if let Some(signal) = self.signal.take() {
                if signal != 0 {
                    self.signals.set(signal);
                }
                return Err(ErrorKind::Interrupted.into());
            }
            self.data.fill_buf()
        }

        fn consume(&mut self, amount: usize) {
            self.data.consume(amount)
        }
    }

    #[test]
    fn signal_during_question() {
        static SIGNALS: Latch = Latch::new();
        let mut input = Interrupting {
            signals: &SIGNALS,
            signal: Some(libc::SIGINT),
            data: Cursor::new(b"y\n".to_vec()),
        };
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Ask, &mut input);
        prompter.signals = &SIGNALS;
        assert![matches![
            prompter.reply(&mut out, "CLEAR"),
            Err(Error::Interrupted(libc::SIGINT))
        ]];
    }

    #[test]
    fn interrupted_read_without_signal_is_retried() {
        static SIGNALS: Latch = Latch::new();
        let mut input = Interrupting {
            signals: &SIGNALS,
            signal: Some(0),
            data: Cursor::new(b"n\n".to_vec()),
        };
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Ask, &mut input);
        prompter.signals = &SIGNALS;
        assert_eq![prompter.reply(&mut out, "REMOVE").unwrap(), false];
    }

    #[test]
    fn pending_signal_overrides_fixed_answer() {
        static SIGNALS: Latch = Latch::new();
        SIGNALS.set(libc::SIGTERM);
        let mut input = std::io::empty();
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Yes, &mut input);
        prompter.signals = &SIGNALS;
        assert![matches![
            prompter.reply(&mut out, "FIX"),
            Err(Error::Interrupted(libc::SIGTERM))
        ]];
        assert_eq![String::from_utf8(out).unwrap(), "\nFIX?  yes\n\n"];
    }

    #[test]
    fn end_of_input_aborts() {
        let mut input = Cursor::new(b"x\n".to_vec());
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Answer::Ask, &mut input);
        assert![matches![
            prompter.reply(&mut out, "CONTINUE"),
            Err(Error::Aborted(_))
        ]];
    }
}
