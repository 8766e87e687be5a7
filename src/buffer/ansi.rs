//! ANSI escape sequence stripping

/// Longest unterminated escape sequence carried between reads before it is
/// dropped as garbage.
const MAX_PENDING: usize = 256;

/// Strip ANSI escape sequences from a complete byte slice.
///
/// An escape sequence left unterminated at the end of `data` is dropped.
pub fn strip_ansi(data: &[u8]) -> Vec<u8> {
    strip_complete(data).0
}

/// Incremental stripper for output that arrives in chunks.
///
/// Terminal output over a network channel is split at arbitrary byte
/// boundaries, so an escape sequence may begin in one read and end in the
/// next. The unterminated tail is held back until the rest arrives.
#[derive(Debug, Default)]
pub struct AnsiStripper {
    pending: Vec<u8>,
}

impl AnsiStripper {
    /// Create a stripper with nothing pending
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning the printable bytes it completes
    pub fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(data);

        let (output, consumed) = strip_complete(&input);
        if input.len() - consumed <= MAX_PENDING {
            self.pending = input[consumed..].to_vec();
        }
        output
    }

    /// Bytes held back waiting for the end of an escape sequence
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Strips every complete sequence and returns how many input bytes were
/// consumed; anything after that offset is an unterminated sequence.
fn strip_complete(data: &[u8]) -> (Vec<u8>, usize) {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data[i] != b'\x1b' {
            result.push(data[i]);
            i += 1;
            continue;
        }

        if i + 1 >= data.len() {
            return (result, i);
        }

        match data[i + 1] {
            b'[' => {
                // CSI: parameters then a final byte in 0x40..=0x7e
                let Some(end) = data[i + 2..]
                    .iter()
                    .position(|b| (0x40..=0x7e).contains(b))
                else {
                    return (result, i);
                };
                i += 2 + end + 1;
            }
            b']' => {
                // OSC: terminated by BEL or ESC \
                let mut j = i + 2;
                let mut terminated = None;
                while j < data.len() {
                    if data[j] == b'\x07' {
                        terminated = Some(j + 1);
                        break;
                    }
                    if data[j] == b'\x1b' && j + 1 < data.len() && data[j + 1] == b'\\' {
                        terminated = Some(j + 2);
                        break;
                    }
                    j += 1;
                }
                match terminated {
                    Some(next) => i = next,
                    None => return (result, i),
                }
            }
            b'(' | b')' => {
                // Character set selection (ESC ( X)
                if i + 2 >= data.len() {
                    return (result, i);
                }
                i += 3;
            }
            _ => i += 2,
        }
    }

    (result, data.len())
}
