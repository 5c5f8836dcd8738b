//! POSIX shell quoting
//!
//! Every value that reaches a remote command line from outside the program
//! (model names, prompts, paths, pass-through flags) goes through [`quote`].
//! There is deliberately no "quote only if needed" variant.

/// Quote a string as a single POSIX `sh` word.
///
/// The whole input is wrapped in single quotes. Each embedded single quote
/// becomes `'\''`: close the quoted run, emit an escaped quote, reopen.
/// The empty string becomes `''` so it still occupies an argument slot.
///
/// # Examples
///
/// ```
/// use dgx_manager::ssh::quote::quote;
///
/// assert_eq!(quote("llama3"), "'llama3'");
/// assert_eq!(quote("it's"), "'it'\\''s'");
/// assert_eq!(quote(""), "''");
/// ```
pub fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Quote each argument and join them with single spaces.
///
/// ```
/// use dgx_manager::ssh::quote::quote_all;
///
/// assert_eq!(quote_all(["--tail", "50"]), "'--tail' '50'");
/// ```
pub fn quote_all<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
