//! Keyword classification of captured menu output

use crate::config::PatternSet;
use crate::pattern::Pattern;
use crate::result::{PatternError, Verdict};

/// How a script's output is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMode {
    /// The operation must print a success marker.
    Confirmation,
    /// The operation prints data rather than a message; any output without
    /// an error marker counts as success.
    Listing,
}

/// Compiled success and error keyword sets.
///
/// An error marker always wins. Success requires a success marker and no
/// error marker; with neither the verdict is [`Verdict::NoConfirmation`].
#[derive(Debug, Clone)]
pub struct Classifier {
    success: Option<Pattern>,
    error: Option<Pattern>,
}

impl Classifier {
    /// Compile keyword sets.
    pub fn new(patterns: &PatternSet) -> Result<Self, PatternError> {
        Ok(Self {
            success: patterns.success_pattern()?,
            error: patterns.error_pattern()?,
        })
    }

    /// Judge `text`.
    pub fn classify(&self, text: &str, mode: ClassifyMode) -> Verdict {
        if let Some(error) = &self.error {
            let failing_line = text
                .lines()
                .rev()
                .find(|line| error.is_match(line.as_bytes()));
            if let Some(line) = failing_line {
                return Verdict::Failed {
                    line: line.trim().to_string(),
                };
            }
        }

        let confirmed = match mode {
            ClassifyMode::Confirmation => self
                .success
                .as_ref()
                .is_some_and(|p| p.is_match(text.as_bytes())),
            ClassifyMode::Listing => !text.trim().is_empty(),
        };
        if confirmed {
            Verdict::Success
        } else {
            Verdict::NoConfirmation
        }
    }
}

/// Remove the terminal's echo of `input` from `segment`, the output that
/// followed typing it.
///
/// The echo is the end of the segment's first line; anything else is left
/// alone, so a value typed with echo off is never cut out of later output.
pub fn strip_echo(segment: &str, input: &str) -> String {
    let line_end = segment.find(['\r', '\n']).unwrap_or(segment.len());
    let line = &segment[..line_end];
    if input.is_empty() || !line.ends_with(input) {
        return segment.to_string();
    }
    let rest = &segment[line_end..];
    let ending = if rest.starts_with("\r\n") {
        2
    } else {
        rest.len().min(1)
    };
    format!("{}{}", &line[..line.len() - input.len()], &rest[ending..])
}

/// Judge `text` with the given keyword sets.
pub fn classify(text: &str, patterns: &PatternSet) -> Result<Verdict, PatternError> {
    Ok(Classifier::new(patterns)?.classify(text, ClassifyMode::Confirmation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(text: &str) -> Verdict {
        classify(text, &PatternSet::default()).unwrap()
    }

    #[test]
    fn test_success() {
        assert_eq!(verdict("Usuario renovado EXITOSAMENTE"), Verdict::Success);
        assert_eq!(verdict("USUARIO GENERADO CON EXITO"), Verdict::Success);
        assert_eq!(verdict("IP DEL SERVIDOR: 203.0.113.5"), Verdict::Success);
    }

    #[test]
    fn test_error_wins_over_success() {
        let text = "usuario creado exitosamente\nERROR: el usuario ya existe\nvolviendo...";
        assert_eq!(
            verdict(text),
            Verdict::Failed {
                line: "ERROR: el usuario ya existe".into()
            }
        );
    }

    #[test]
    fn test_last_error_line_reported() {
        let text = "error de red\nreintentando\nEl usuario no existe\n";
        assert_eq!(
            verdict(text),
            Verdict::Failed {
                line: "El usuario no existe".into()
            }
        );
    }

    #[test]
    fn test_neither_is_no_confirmation() {
        assert_eq!(verdict("Presione ENTER para continuar"), Verdict::NoConfirmation);
        assert_eq!(verdict(""), Verdict::NoConfirmation);
    }

    #[test]
    fn test_listing_mode() {
        let classifier = Classifier::new(&PatternSet::default()).unwrap();
        assert_eq!(
            classifier.classify("client01 | 198.51.100.7 | SSH", ClassifyMode::Listing),
            Verdict::Success
        );
        assert_eq!(
            classifier.classify("  \n", ClassifyMode::Listing),
            Verdict::NoConfirmation
        );
        assert!(matches!(
            classifier.classify("fallo al leer", ClassifyMode::Listing),
            Verdict::Failed { .. }
        ));
    }

    #[test]
    fn test_strip_echo() {
        assert_eq!(strip_echo("7\r\nMONITOR DE CONEXIONES\r\n", "7"), "MONITOR DE CONEXIONES\r\n");
        // a prompt that arrived late shares the line with the echo
        assert_eq!(strip_echo("Dias: 30\r\nUSUARIO GENERADO", "30"), "Dias: USUARIO GENERADO");
        assert_eq!(strip_echo("error01\nContrasena: ", "error01"), "Contrasena: ");
        assert_eq!(strip_echo("client01", "client01"), "");
    }

    #[test]
    fn test_strip_echo_leaves_unechoed_output() {
        // secret read with echo off; the banner repeats it later
        let segment = "\r\nCONTRASENA: s3cret\r\n";
        assert_eq!(strip_echo(segment, "s3cret"), segment);
        assert_eq!(strip_echo("[1] BLOQUEAR: ", "1"), "[1] BLOQUEAR: ");
        assert_eq!(strip_echo("", "7"), "");
        assert_eq!(strip_echo("\r\n", ""), "\r\n");
    }

    #[test]
    fn test_echo_only_listing_is_no_confirmation() {
        let classifier = Classifier::new(&PatternSet::default()).unwrap();
        let window = strip_echo("7\r\n", "7");
        assert_eq!(
            classifier.classify(&window, ClassifyMode::Listing),
            Verdict::NoConfirmation
        );
    }

    #[test]
    fn test_custom_patterns() {
        let patterns = PatternSet {
            success: vec!["done".into()],
            error: vec![],
        };
        assert_eq!(classify("error but done", &patterns).unwrap(), Verdict::Success);
    }
}
