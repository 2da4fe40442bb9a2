//! Per-instance filesystem layout and binary file IO.
//!
//! ```text
//! io/<size>/public_keys/{cc,pk,mk,rk,layer{1..}_rk}.bin
//! io/<size>/secret_key/sk.bin
//! io/<size>/ciphertexts_upload/cipher_input_<i>.bin
//! io/<size>/ciphertexts_download/cipher_result_<i>.bin
//! io/<size>/encrypted_model_predictions.txt
//! datasets/<size>/intermediate/test_pixels.txt
//! weights/<network>/<layer>_{weight,bias}.csv
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::backend::reference::{RefCiphertext, ReferenceBackend};
use crate::error::{EvalError, Result};
use crate::params::{InstanceSize, Network};

/// Directory layout rooted at the working directory (or a chosen root).
#[derive(Debug, Clone)]
pub struct InstanceDirs {
    root: PathBuf,
    size: InstanceSize,
}

impl InstanceDirs {
    pub fn new(root: impl Into<PathBuf>, size: InstanceSize) -> Self {
        Self { root: root.into(), size }
    }

    pub fn io_dir(&self) -> PathBuf {
        self.root.join("io").join(self.size.name())
    }

    pub fn public_keys_dir(&self) -> PathBuf {
        self.io_dir().join("public_keys")
    }

    pub fn secret_key_dir(&self) -> PathBuf {
        self.io_dir().join("secret_key")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.io_dir().join("ciphertexts_upload")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.io_dir().join("ciphertexts_download")
    }

    pub fn context_file(&self) -> PathBuf {
        self.public_keys_dir().join("cc.bin")
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.public_keys_dir().join("pk.bin")
    }

    pub fn mult_keys_file(&self) -> PathBuf {
        self.public_keys_dir().join("mk.bin")
    }

    pub fn rotation_keys_file(&self) -> PathBuf {
        self.public_keys_dir().join("rk.bin")
    }

    pub fn layer_rotation_keys_file(&self, group: usize) -> PathBuf {
        self.public_keys_dir().join(format!("layer{}_rk.bin", group + 1))
    }

    pub fn secret_key_file(&self) -> PathBuf {
        self.secret_key_dir().join("sk.bin")
    }

    pub fn input_ciphertext_file(&self, index: usize) -> PathBuf {
        self.upload_dir().join(format!("cipher_input_{}.bin", index))
    }

    pub fn result_ciphertext_file(&self, index: usize) -> PathBuf {
        self.download_dir().join(format!("cipher_result_{}.bin", index))
    }

    pub fn predictions_file(&self) -> PathBuf {
        self.io_dir().join("encrypted_model_predictions.txt")
    }

    pub fn test_pixels_file(&self) -> PathBuf {
        self.root
            .join("datasets")
            .join(self.size.name())
            .join("intermediate")
            .join("test_pixels.txt")
    }

    pub fn weights_dir(&self, network: Network) -> PathBuf {
        self.root.join("weights").join(network.name())
    }

    pub fn batch_size(&self) -> usize {
        self.size.batch_size()
    }
}

/// Write bytes, creating parent directories.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EvalError::Io(format!("{}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, bytes).map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))
}

pub fn write_ciphertext(path: &Path, ct: &RefCiphertext) -> Result<()> {
    write_bytes(path, &ReferenceBackend::serialize_ciphertext(ct))
}

pub fn read_ciphertext(path: &Path) -> Result<RefCiphertext> {
    ReferenceBackend::deserialize_ciphertext(&read_bytes(path)?)
}

/// One decimal class index per line, in input order.
pub fn write_predictions(path: &Path, labels: &[usize]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EvalError::Io(format!("{}: {}", parent.display(), e)))?;
    }
    let mut file = std::fs::File::create(path)
        .map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
    for label in labels {
        writeln!(file, "{}", label)
            .map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
    }
    Ok(())
}
