//! Yes/no prompt used before destructive operations

use std::io::{self, BufRead, Write};

/// Ask on stdout, read the answer from stdin.
pub fn confirm(message: &str, default_yes: bool) -> io::Result<bool> {
    let stdin = io::stdin();
    confirm_with(&mut stdin.lock(), &mut io::stdout(), message, default_yes)
}

/// Prompt on `output` and read one line from `input`. An empty answer or a
/// closed input stream takes the default.
pub fn confirm_with<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
    default_yes: bool,
) -> io::Result<bool> {
    let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
    write!(output, "{message} {hint}: ")?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        writeln!(output)?;
        return Ok(default_yes);
    }

    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(default_yes);
    }
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}
