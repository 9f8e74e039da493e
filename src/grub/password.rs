use anyhow::Result;

use crate::cmd::Runner;

/// Bootloader password as written to grub.conf and kickstart output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Password {
    /// MD5-crypt hash for the `password --md5` directive
    pub hash: Option<String>,
    /// Plain text, only known when it was entered unhashed
    pub plain: Option<String>,
}

impl Password {
    /// Set from user input. Plain text is hashed with MD5-crypt through
    /// `openssl passwd -1`; an already hashed value is only usable by grub.
    pub fn set(runner: &dyn Runner, value: &str, is_crypted: bool, use_grub: bool) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::default());
        }

        if is_crypted {
            if !use_grub {
                return Ok(Self::default());
            }
            return Ok(Self {
                hash: Some(value.to_string()),
                plain: None,
            });
        }

        let hash = runner.run_output_with_stdin(
            "openssl",
            &["passwd", "-1", "-stdin"],
            format!("{}\n", value).as_bytes(),
        )?;

        Ok(Self {
            hash: Some(hash),
            plain: Some(value.to_string()),
        })
    }
}
