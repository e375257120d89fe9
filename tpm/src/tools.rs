// SPDX-License-Identifier: Apache-2.0

//! TPM device backed by the `tpm2-tools` command-line utilities.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tracing::info;

use crate::{PcrSelection, PcrValue, RawQuote, TpmDevice};

pub struct Tpm2ToolsDevice {
    tcti: String,
    work_dir: TempDir,
    ak_ready: bool,
}

struct TpmOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl TpmOutput {
    fn from_output(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

impl Tpm2ToolsDevice {
    /// Open a device with optional TCTI string (auto-detect if None)
    pub fn open(tcti: Option<&str>) -> Result<Self> {
        match tcti {
            Some(t) => Self::new(t),
            None => Self::detect(),
        }
    }

    /// Detect and connect to an available TPM device
    pub fn detect() -> Result<Self> {
        let tcti = if Path::new("/dev/tpmrm0").exists() {
            "device:/dev/tpmrm0"
        } else if Path::new("/dev/tpm0").exists() {
            "device:/dev/tpm0"
        } else {
            bail!("TPM device not found");
        };
        Self::new(tcti)
    }

    /// Create a device with a specific TCTI string
    pub fn new(tcti: &str) -> Result<Self> {
        let work_dir = TempDir::new().context("failed to create TPM work directory")?;
        Ok(Self {
            tcti: tcti.to_string(),
            work_dir,
            ak_ready: false,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.work_dir.path().join(name)
    }

    /// Run a tpm2 command
    fn run_cmd(&self, cmd: &str, args: &[&str]) -> Result<TpmOutput> {
        let mut command = Command::new(cmd);
        command.env("TPM2TOOLS_TCTI", &self.tcti).args(args);
        match command.output() {
            Ok(output) => Ok(TpmOutput::from_output(output)),
            Err(err) if err.kind() == ErrorKind::NotFound => bail!("{cmd} not found"),
            Err(err) => Err(err).context("failed to run tpm2 command"),
        }
    }

    fn run_checked(&self, cmd: &str, args: &[&str]) -> Result<TpmOutput> {
        let output = self.run_cmd(cmd, args)?;
        if !output.success {
            bail!("{cmd} failed: {}", output.stderr_string());
        }
        Ok(output)
    }

    /// Create the transient EK and AK once per device
    fn ensure_ak(&mut self) -> Result<()> {
        if self.ak_ready {
            return Ok(());
        }

        let ek_ctx = self.path("ek.ctx");
        let ak_ctx = self.path("ak.ctx");
        let ak_pub = self.path("ak.pub");

        self.run_checked(
            "tpm2_createek",
            &["-c", &ek_ctx.to_string_lossy(), "-G", "rsa"],
        )?;
        self.run_checked(
            "tpm2_createak",
            &[
                "-C",
                &ek_ctx.to_string_lossy(),
                "-c",
                &ak_ctx.to_string_lossy(),
                "-u",
                &ak_pub.to_string_lossy(),
                "-G",
                "rsa",
                "-g",
                "sha256",
                "-s",
                "rsassa",
            ],
        )?;

        info!("created transient attestation key");
        self.ak_ready = true;
        Ok(())
    }
}

impl TpmDevice for Tpm2ToolsDevice {
    fn banks(&self) -> Vec<String> {
        // sha1 banks are disabled on most vTPMs
        vec!["sha256".to_string()]
    }

    fn ak_public(&mut self) -> Result<Vec<u8>> {
        self.ensure_ak()?;
        let ak_der = self.path("ak.der");
        self.run_checked(
            "tpm2_readpublic",
            &[
                "-c",
                &self.path("ak.ctx").to_string_lossy(),
                "-f",
                "der",
                "-o",
                &ak_der.to_string_lossy(),
            ],
        )?;
        std::fs::read(&ak_der).context("failed to read AK public key")
    }

    fn quote(&mut self, extra_data: &[u8], selection: &PcrSelection) -> Result<RawQuote> {
        self.ensure_ak()?;

        // PCR values are read just before quoting; the quote's digest check
        // catches a PCR changing in between
        let pcr_values = self.read_pcrs(selection)?;

        let qual_data = self.path("qual_data.bin");
        std::fs::write(&qual_data, extra_data)?;

        let quote_msg = self.path("quote.msg");
        let quote_sig = self.path("quote.sig");
        self.run_checked(
            "tpm2_quote",
            &[
                "-c",
                &self.path("ak.ctx").to_string_lossy(),
                "-l",
                &selection.to_arg(),
                "-m",
                &quote_msg.to_string_lossy(),
                "-s",
                &quote_sig.to_string_lossy(),
                "-q",
                &qual_data.to_string_lossy(),
                "-g",
                "sha256",
            ],
        )?;

        let message = std::fs::read(&quote_msg)?;
        let signature = std::fs::read(&quote_sig)?;

        Ok(RawQuote {
            message,
            signature,
            pcr_values,
        })
    }

    fn sign(&mut self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        self.ensure_ak()?;

        let digest_file = self.path("digest.bin");
        std::fs::write(&digest_file, digest)?;
        let sig_file = self.path("sig.bin");

        self.run_checked(
            "tpm2_sign",
            &[
                "-c",
                &self.path("ak.ctx").to_string_lossy(),
                "-g",
                "sha256",
                "-d",
                "-f",
                "plain",
                "-o",
                &sig_file.to_string_lossy(),
                &digest_file.to_string_lossy(),
            ],
        )?;

        std::fs::read(&sig_file).context("failed to read signature")
    }

    fn pcr_extend(&mut self, bank: &str, index: u32, digest: &[u8]) -> Result<()> {
        let pcr_arg = format!("{index}:{bank}={}", hex::encode(digest));
        self.run_checked("tpm2_pcrextend", &[&pcr_arg])?;
        info!("extended PCR {index} ({bank})");
        Ok(())
    }

    fn read_pcrs(&mut self, selection: &PcrSelection) -> Result<Vec<PcrValue>> {
        let pcr_output = self.path("pcr_values.bin");
        self.run_checked(
            "tpm2_pcrread",
            &["-o", &pcr_output.to_string_lossy(), &selection.to_arg()],
        )?;

        let pcr_data = std::fs::read(&pcr_output)?;
        let hash_size = selection.digest_len()?;
        if pcr_data.len() != selection.pcrs.len() * hash_size {
            bail!(
                "tpm2_pcrread returned {} bytes, expected {}",
                pcr_data.len(),
                selection.pcrs.len() * hash_size
            );
        }

        let pcr_values = selection
            .pcrs
            .iter()
            .zip(pcr_data.chunks_exact(hash_size))
            .map(|(&index, value)| PcrValue {
                index,
                algorithm: selection.bank.clone(),
                value: value.to_vec(),
            })
            .collect();
        Ok(pcr_values)
    }
}
