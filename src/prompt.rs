use std::io::{self, BufRead, Write};

pub const PRINT_PROMPT: &str =
    "Do you want to print the messages? (y) then ENTER for yes, anything else for no: ";
pub const DELETE_PROMPT: &str = "Are you sure you want to delete the messages? (yes/no): ";

/// Writes `question`, reads one line and compares it to `accepted`, ignoring
/// case and surrounding whitespace. End of input counts as a refusal.
pub fn confirm<R, W>(reader: &mut R, writer: &mut W, question: &str, accepted: &str) -> io::Result<bool>
where
    R: BufRead,
    W: Write,
{
    write!(writer, "{question}")?;
    writer.flush()?;

    let mut answer = String::new();
    if reader.read_line(&mut answer)? == 0 {
        writeln!(writer)?;
        return Ok(false);
    }
    Ok(answer.trim().eq_ignore_ascii_case(accepted))
}

/// Like [`confirm`], but answers `accepted` on the caller's behalf when
/// `assume_yes` is set, echoing the question so the run log stays readable.
pub fn confirm_or_assume<R, W>(
    reader: &mut R,
    writer: &mut W,
    question: &str,
    accepted: &str,
    assume_yes: bool,
) -> io::Result<bool>
where
    R: BufRead,
    W: Write,
{
    if assume_yes {
        writeln!(writer, "{question}{accepted} (--yes)")?;
        return Ok(true);
    }
    confirm(reader, writer, question, accepted)
}
