//! Operator confirmation prompts
//!
//! Trust decisions and privileged download-and-run steps ask the operator a
//! free-text `[Y/n]` question. The [`Prompt`] trait is the seam that lets
//! tests answer without a terminal.

use std::io::{self, BufRead, BufReader, Stderr, Stdin, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Interactive operator surface
pub trait Prompt: Send + Sync {
    /// Show a warning to the operator.
    fn warn(&self, message: &str) -> io::Result<()>;

    /// Ask a `[Y/n]` question. End of input counts as "no".
    fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// Interpret a `[Y/n]` answer: empty, `y` or `yes` (any case) accept.
pub fn parse_confirmation(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

/// Show `warning`, then ask `question`, on the blocking thread pool.
///
/// Reading a terminal blocks; running it off the async workers keeps the
/// SSH session and signal handlers polled while the operator decides.
pub async fn ask(prompt: Arc<dyn Prompt>, warning: String, question: String) -> io::Result<bool> {
    tokio::task::spawn_blocking(move || {
        prompt.warn(&warning)?;
        prompt.confirm(&question)
    })
    .await
    .map_err(io::Error::other)?
}

/// Line-oriented prompt over any reader/writer pair
pub struct LinePrompt<R, W> {
    io: Mutex<(R, W)>,
}

impl LinePrompt<BufReader<Stdin>, Stderr> {
    /// Prompt on stderr, read answers from stdin
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R, W> LinePrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// Recover the reader and writer, e.g. to inspect what was printed
    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> Prompt for LinePrompt<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn warn(&self, message: &str) -> io::Result<()> {
        let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(io.1, "WARNING: {message}")?;
        io.1.flush()
    }

    fn confirm(&self, question: &str) -> io::Result<bool> {
        let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (reader, writer) = &mut *io;
        write!(writer, "{question} [Y/n]: ")?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            return Ok(false);
        }
        Ok(parse_confirmation(&line))
    }
}

/// Prompt that replays canned answers and records what it was asked
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ScriptedPrompt {
    answers: Mutex<std::collections::VecDeque<bool>>,
    transcript: Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub(crate) fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            transcript: Mutex::default(),
        }
    }

    pub(crate) fn transcript(&self) -> Vec<String> {
        self.transcript.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Prompt for ScriptedPrompt {
    fn warn(&self, message: &str) -> io::Result<()> {
        self.transcript.lock().unwrap().push(format!("warn: {message}"));
        Ok(())
    }

    fn confirm(&self, question: &str) -> io::Result<bool> {
        self.transcript.lock().unwrap().push(format!("confirm: {question}"));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn answer_with(input: &str) -> (bool, String) {
        let prompt = LinePrompt::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
        let answer = prompt.confirm("Trust host dgx?").unwrap();
        let (_, written) = prompt.into_inner();
        (answer, String::from_utf8(written).unwrap())
    }

    #[test]
    fn test_parse_confirmation_defaults_to_yes() {
        assert!(parse_confirmation(""));
        assert!(parse_confirmation("\n"));
        assert!(parse_confirmation("   "));
    }

    #[test]
    fn test_parse_confirmation_case_insensitive() {
        for yes in ["y", "Y", "yes", "YES", "Yes", " y \n"] {
            assert!(parse_confirmation(yes), "{yes:?} should accept");
        }
        for no in ["n", "N", "no", "nope", "yess", "0"] {
            assert!(!parse_confirmation(no), "{no:?} should decline");
        }
    }

    #[test]
    fn test_line_prompt_writes_question() {
        let (answer, written) = answer_with("y\n");
        assert!(answer);
        assert_eq!(written, "Trust host dgx? [Y/n]: ");
    }

    #[test]
    fn test_line_prompt_empty_line_accepts() {
        assert!(answer_with("\n").0);
    }

    #[test]
    fn test_line_prompt_decline() {
        assert!(!answer_with("n\n").0);
    }

    #[test]
    fn test_line_prompt_eof_declines() {
        let (answer, written) = answer_with("");
        assert!(!answer);
        assert!(written.ends_with('\n'));
    }

    #[test]
    fn test_line_prompt_warn() {
        let prompt = LinePrompt::new(Cursor::new(Vec::new()), Vec::new());
        prompt.warn("first contact with dgx:22").unwrap();
        let (_, written) = prompt.into_inner();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "WARNING: first contact with dgx:22\n"
        );
    }

    #[test]
    fn test_scripted_prompt_runs_out() {
        let prompt = ScriptedPrompt::answering([true]);
        assert!(prompt.confirm("one").unwrap());
        assert!(prompt.confirm("two").is_err());
        assert_eq!(prompt.transcript(), vec!["confirm: one", "confirm: two"]);
    }

    #[tokio::test]
    async fn test_ask_runs_off_the_async_workers() {
        let prompt = Arc::new(ScriptedPrompt::answering([false]));

        let answer = ask(prompt.clone(), "unknown host".to_string(), "Trust it?".to_string())
            .await
            .unwrap();

        assert!(!answer);
        assert_eq!(
            prompt.transcript(),
            vec!["warn: unknown host", "confirm: Trust it?"]
        );
    }
}
