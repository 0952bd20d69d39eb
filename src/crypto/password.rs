//! Password acquisition.
//!
//! Passwords come from a file (zeroed out on disk after reading) or from an
//! interactive prompt on standard input. In-memory copies are scrubbed on
//! drop.

use std::fs::OpenOptions;
use std::io::{BufRead, Read, Seek, SeekFrom, Write};
use std::path::Path;

use zeroize::{Zeroize, Zeroizing};

use crate::constants::MAX_PW_LEN;
use crate::crypto::CryptoError;

/// Read the password from `pwd_file` when given, else prompt. Trailing
/// whitespace is stripped either way.
pub fn get_password(
    pwd_file: Option<&Path>,
    prompt: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    match pwd_file {
        Some(path) => read_password_file(path),
        None => prompt_password(prompt),
    }
}

fn read_password_file(path: &Path) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| CryptoError::PasswordUnavailable(format!("{}: {}", path.display(), e)))?;

    let mut raw = Zeroizing::new(Vec::new());
    file.read_to_end(&mut raw)
        .map_err(|e| CryptoError::PasswordUnavailable(e.to_string()))?;
    let stored_len = raw.len();

    // The file must be writable since it is zeroed after the read.
    let zeros = vec![0u8; stored_len];
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&zeros))
        .and_then(|_| file.flush())
        .map_err(|e| CryptoError::PasswordUnavailable(format!("cannot zero password file: {}", e)))?;

    let mut end = raw.len();
    while end > 0 && raw[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let end = end.min(MAX_PW_LEN);
    if end == 0 {
        return Err(CryptoError::PasswordUnavailable(
            "password file is empty".to_string(),
        ));
    }
    Ok(Zeroizing::new(raw[..end].to_vec()))
}

fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    eprint!("{}: ", prompt);
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CryptoError::PasswordUnavailable(e.to_string()))?;

    let trimmed = line.trim_end().as_bytes();
    let end = trimmed.len().min(MAX_PW_LEN);
    if end == 0 {
        line.zeroize();
        return Err(CryptoError::PasswordUnavailable("empty password".to_string()));
    }
    let pw = Zeroizing::new(trimmed[..end].to_vec());
    line.zeroize();
    Ok(pw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn password_file_is_read_and_zeroed() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"sekrit\n").unwrap();
        tmp.flush().unwrap();

        let pw = read_password_file(tmp.path()).unwrap();
        assert_eq!(&*pw, b"sekrit");

        let left = std::fs::read(tmp.path()).unwrap();
        assert_eq!(left, vec![0u8; 7]);
    }

    #[test]
    fn empty_password_file_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(read_password_file(tmp.path()).is_err());
    }
}
