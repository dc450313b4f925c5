// Keepsake backup system.

//! Terminal menus. All interactive code lives here; the library only
//! returns candidate lists and accepts a chosen index.

use std::io::{self, BufRead, Write};

/// Let the user pick from a numbered list. Returns an index into
/// `choices`.
pub fn choose_from_menu(choices: &[String], prompt: &str) -> io::Result<usize> {
    let number_width = choices.len().to_string().len();
    let mut stdout = io::stdout();
    for (number, choice) in choices.iter().enumerate() {
        writeln!(stdout, "{:>number_width$}: {}", number + 1, choice)?;
    }
    let stdin = io::stdin();
    loop {
        write!(stdout, "{prompt}: ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no selection made",
            ));
        }
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=choices.len()).contains(&n) => return Ok(n - 1),
            _ => writeln!(stdout, "Enter a number from 1 to {}", choices.len())?,
        }
    }
}
