//! Reference backend: an exact simulation of the CKKS slot model.
//!
//! Slots are plain `f64` values and arithmetic is exact, so the approximation
//! error bounds of a real CKKS implementation hold trivially. What the
//! reference backend *does* model faithfully is everything the evaluator can
//! get wrong:
//!
//! - level accounting: every plaintext multiply, merge and Chebyshev
//!   evaluation consumes budget, and a plaintext must meet a ciphertext at
//!   exactly the level it was encoded for;
//! - the automorphism key table: a rotation without its key loaded fails,
//!   and every invoked offset can be recorded so the rotation-key planners
//!   are testable against the kernels;
//! - key binding: encrypt needs a public key, decrypt the matching secret
//!   key;
//! - deterministic binary serialization of contexts, keys and ciphertexts.
//!
//! The Chebyshev evaluation is a genuine interpolation at cosine nodes
//! (Clenshaw recurrence per slot), so activation-accuracy tests measure real
//! polynomial error, not a stand-in.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{depth, CkksBackend, SlotGeometry};
use crate::error::{EvalError, Result};
use crate::params::CkksParams;

const MAGIC_CONTEXT: &[u8; 4] = b"SNCC";
const MAGIC_CIPHERTEXT: &[u8; 4] = b"SNCT";
const MAGIC_PUBLIC: &[u8; 4] = b"SNPK";
const MAGIC_SECRET: &[u8; 4] = b"SNSK";
const MAGIC_MULT: &[u8; 4] = b"SNMK";
const MAGIC_ROTATION: &[u8; 4] = b"SNRK";

/// Encoded vector at a fixed level.
#[derive(Debug, Clone, PartialEq)]
pub struct RefPlaintext {
    pub values: Vec<f64>,
    pub level: usize,
}

/// Simulated ciphertext: slot payload, remaining budget, owning key pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RefCiphertext {
    pub slots: Vec<f64>,
    pub level: usize,
    pub key_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPublicKey {
    pub key_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSecretKey {
    pub key_id: u64,
}

/// Stand-in for hoisted-rotation decomposition digits. Producing one is the
/// shared precomputation; each `rotate_hoisted` call reuses it.
#[derive(Debug)]
pub struct RefHoistDigits {
    level: usize,
}

#[derive(Debug, Clone, Default)]
struct KeyTable {
    rotation: BTreeSet<i32>,
    sum_keys: bool,
}

/// The one mutable piece of shared state: the loaded key table, plus the
/// optional rotation recorder used by planner tests.
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    geometry: SlotGeometry,
    public_key: Option<u64>,
    secret_key: Option<u64>,
    keys: RefCell<KeyTable>,
    recorder: RefCell<Option<BTreeSet<i32>>>,
}

impl ReferenceBackend {
    pub fn new(params: &CkksParams) -> Self {
        Self {
            geometry: SlotGeometry {
                num_slots: params.num_slots,
                max_level: params.depth,
                bootstrap_level: params.bootstrap_level,
            },
            public_key: None,
            secret_key: None,
            keys: RefCell::new(KeyTable::default()),
            recorder: RefCell::new(None),
        }
    }

    /// Generate a key pair. The seed makes key material reproducible, which
    /// keeps serialized artifacts byte-stable across runs of the same setup.
    pub fn generate_keys(&mut self, seed: u64) -> (RefPublicKey, RefSecretKey) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let key_id: u64 = rng.gen();
        self.public_key = Some(key_id);
        self.secret_key = Some(key_id);
        (RefPublicKey { key_id }, RefSecretKey { key_id })
    }

    pub fn attach_public_key(&mut self, pk: &RefPublicKey) {
        self.public_key = Some(pk.key_id);
    }

    pub fn attach_secret_key(&mut self, sk: &RefSecretKey) {
        self.secret_key = Some(sk.key_id);
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Start recording every rotation offset the evaluator invokes.
    pub fn start_recording(&self) {
        *self.recorder.borrow_mut() = Some(BTreeSet::new());
    }

    /// Stop recording and return the invoked offsets.
    pub fn take_recorded(&self) -> BTreeSet<i32> {
        self.recorder.borrow_mut().take().unwrap_or_default()
    }

    pub fn loaded_rotation_keys(&self) -> BTreeSet<i32> {
        self.keys.borrow().rotation.clone()
    }

    fn check_rotation_key(&self, k: i32) -> Result<()> {
        if k == 0 {
            return Ok(());
        }
        if let Some(rec) = self.recorder.borrow_mut().as_mut() {
            rec.insert(k);
        }
        if self.keys.borrow().rotation.contains(&k) {
            Ok(())
        } else {
            Err(EvalError::MissingRotationKey(k))
        }
    }

    fn check_levels(&self, ct_level: usize, pt_level: usize) -> Result<()> {
        if ct_level != pt_level {
            return Err(EvalError::LevelMismatch { expected: ct_level, actual: pt_level });
        }
        Ok(())
    }

    fn spend(&self, level: usize, cost: usize) -> Result<usize> {
        if level < cost {
            return Err(EvalError::LevelExhausted { needed: cost, remaining: level });
        }
        Ok(level - cost)
    }

    fn rotated(&self, slots: &[f64], k: i32) -> Vec<f64> {
        let n = slots.len() as i64;
        let shift = ((k as i64 % n) + n) % n;
        let mut out = vec![0.0; slots.len()];
        for (i, v) in out.iter_mut().enumerate() {
            *v = slots[((i as i64 + shift) % n) as usize];
        }
        out
    }

    // --- binary formats -------------------------------------------------

    pub fn serialize_context(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(MAGIC_CONTEXT);
        out.write_u64::<LittleEndian>(self.geometry.num_slots as u64).unwrap();
        out.write_u64::<LittleEndian>(self.geometry.max_level as u64).unwrap();
        out.write_u64::<LittleEndian>(self.geometry.bootstrap_level as u64).unwrap();
        out.write_u64::<LittleEndian>(self.public_key.unwrap_or(0)).unwrap();
        out
    }

    pub fn deserialize_context(bytes: &[u8]) -> Result<Self> {
        let mut cur = expect_magic(bytes, MAGIC_CONTEXT, "context")?;
        let num_slots = cur.read_u64::<LittleEndian>()? as usize;
        let max_level = cur.read_u64::<LittleEndian>()? as usize;
        let bootstrap_level = cur.read_u64::<LittleEndian>()? as usize;
        let key_id = cur.read_u64::<LittleEndian>()?;
        Ok(Self {
            geometry: SlotGeometry { num_slots, max_level, bootstrap_level },
            public_key: (key_id != 0).then_some(key_id),
            secret_key: None,
            keys: RefCell::new(KeyTable::default()),
            recorder: RefCell::new(None),
        })
    }

    pub fn serialize_public_key(pk: &RefPublicKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(MAGIC_PUBLIC);
        out.write_u64::<LittleEndian>(pk.key_id).unwrap();
        out
    }

    pub fn deserialize_public_key(bytes: &[u8]) -> Result<RefPublicKey> {
        let mut cur = expect_magic(bytes, MAGIC_PUBLIC, "public key")?;
        Ok(RefPublicKey { key_id: cur.read_u64::<LittleEndian>()? })
    }

    pub fn serialize_secret_key(sk: &RefSecretKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(MAGIC_SECRET);
        out.write_u64::<LittleEndian>(sk.key_id).unwrap();
        out
    }

    pub fn deserialize_secret_key(bytes: &[u8]) -> Result<RefSecretKey> {
        let mut cur = expect_magic(bytes, MAGIC_SECRET, "secret key")?;
        Ok(RefSecretKey { key_id: cur.read_u64::<LittleEndian>()? })
    }

    /// Relinearisation-key stand-in: ties the evaluation key file to the
    /// key pair that produced it.
    pub fn serialize_mult_keys(pk: &RefPublicKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(MAGIC_MULT);
        out.write_u64::<LittleEndian>(pk.key_id).unwrap();
        out
    }

    pub fn deserialize_mult_keys(&self, bytes: &[u8]) -> Result<()> {
        let mut cur = expect_magic(bytes, MAGIC_MULT, "mult keys")?;
        let key_id = cur.read_u64::<LittleEndian>()?;
        match self.public_key {
            Some(id) if id == key_id => Ok(()),
            _ => Err(EvalError::Deserialize(
                "mult keys do not match the loaded context".into(),
            )),
        }
    }

    pub fn serialize_rotation_keys(offsets: &[i32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 4 * offsets.len());
        out.extend_from_slice(MAGIC_ROTATION);
        out.write_u32::<LittleEndian>(offsets.len() as u32).unwrap();
        for &k in offsets {
            out.write_i32::<LittleEndian>(k).unwrap();
        }
        out
    }

    pub fn deserialize_rotation_keys(bytes: &[u8]) -> Result<Vec<i32>> {
        let mut cur = expect_magic(bytes, MAGIC_ROTATION, "rotation keys")?;
        let count = cur.read_u32::<LittleEndian>()? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(cur.read_i32::<LittleEndian>()?);
        }
        Ok(offsets)
    }

    pub fn serialize_ciphertext(ct: &RefCiphertext) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + 8 * ct.slots.len());
        out.extend_from_slice(MAGIC_CIPHERTEXT);
        out.write_u64::<LittleEndian>(ct.key_id).unwrap();
        out.write_u32::<LittleEndian>(ct.level as u32).unwrap();
        out.write_u32::<LittleEndian>(ct.slots.len() as u32).unwrap();
        for &v in &ct.slots {
            out.write_f64::<LittleEndian>(v).unwrap();
        }
        out
    }

    pub fn deserialize_ciphertext(bytes: &[u8]) -> Result<RefCiphertext> {
        let mut cur = expect_magic(bytes, MAGIC_CIPHERTEXT, "ciphertext")?;
        let key_id = cur.read_u64::<LittleEndian>()?;
        let level = cur.read_u32::<LittleEndian>()? as usize;
        let len = cur.read_u32::<LittleEndian>()? as usize;
        let mut slots = Vec::with_capacity(len);
        for _ in 0..len {
            slots.push(cur.read_f64::<LittleEndian>()?);
        }
        Ok(RefCiphertext { slots, level, key_id })
    }
}

fn expect_magic<'a>(bytes: &'a [u8], magic: &[u8; 4], what: &str) -> Result<Cursor<&'a [u8]>> {
    if bytes.len() < 4 || &bytes[..4] != magic {
        return Err(EvalError::Deserialize(format!("bad {} header", what)));
    }
    Ok(Cursor::new(&bytes[4..]))
}

impl CkksBackend for ReferenceBackend {
    type Ciphertext = RefCiphertext;
    type Plaintext = RefPlaintext;
    type HoistDigits = RefHoistDigits;

    fn geometry(&self) -> SlotGeometry {
        self.geometry
    }

    fn encode(&self, values: &[f64], level: usize) -> Result<Self::Plaintext> {
        let n = self.geometry.num_slots;
        if values.len() > n {
            return Err(EvalError::InvalidParams(format!(
                "{} values exceed {} slots",
                values.len(),
                n
            )));
        }
        if level > self.geometry.max_level {
            return Err(EvalError::InvalidParams(format!(
                "encode level {} exceeds depth {}",
                level, self.geometry.max_level
            )));
        }
        let mut padded = values.to_vec();
        padded.resize(n, 0.0);
        Ok(RefPlaintext { values: padded, level })
    }

    fn encrypt(&self, pt: &Self::Plaintext) -> Result<Self::Ciphertext> {
        let key_id = self.public_key.ok_or(EvalError::MissingKey("public key"))?;
        Ok(RefCiphertext { slots: pt.values.clone(), level: pt.level, key_id })
    }

    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>> {
        let key_id = self.secret_key.ok_or(EvalError::MissingKey("secret key"))?;
        if key_id != ct.key_id {
            return Err(EvalError::InvalidParams(
                "ciphertext was encrypted under a different key pair".into(),
            ));
        }
        Ok(ct.slots.clone())
    }

    fn level(&self, ct: &Self::Ciphertext) -> usize {
        ct.level
    }

    fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        // addition level-adjusts to the deeper operand, as the scheme does
        let level = a.level.min(b.level);
        let slots = a.slots.iter().zip(&b.slots).map(|(x, y)| x + y).collect();
        Ok(RefCiphertext { slots, level, key_id: a.key_id })
    }

    fn add_many(&self, cts: &[Self::Ciphertext]) -> Result<Self::Ciphertext> {
        let (first, rest) = cts
            .split_first()
            .ok_or_else(|| EvalError::InvalidParams("add_many of nothing".into()))?;
        let mut acc = first.clone();
        for ct in rest {
            acc = self.add(&acc, ct)?;
        }
        Ok(acc)
    }

    fn add_plain(&self, ct: &Self::Ciphertext, pt: &Self::Plaintext) -> Result<Self::Ciphertext> {
        self.check_levels(ct.level, pt.level)?;
        let slots = ct.slots.iter().zip(&pt.values).map(|(x, y)| x + y).collect();
        Ok(RefCiphertext { slots, level: ct.level, key_id: ct.key_id })
    }

    fn mul(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_levels(a.level, b.level)?;
        let level = self.spend(a.level, 1)?;
        let slots = a.slots.iter().zip(&b.slots).map(|(x, y)| x * y).collect();
        Ok(RefCiphertext { slots, level, key_id: a.key_id })
    }

    fn mul_plain(&self, ct: &Self::Ciphertext, pt: &Self::Plaintext) -> Result<Self::Ciphertext> {
        self.check_levels(ct.level, pt.level)?;
        let level = self.spend(ct.level, 1)?;
        let slots = ct.slots.iter().zip(&pt.values).map(|(x, y)| x * y).collect();
        Ok(RefCiphertext { slots, level, key_id: ct.key_id })
    }

    fn rotate(&self, ct: &Self::Ciphertext, k: i32) -> Result<Self::Ciphertext> {
        self.check_rotation_key(k)?;
        Ok(RefCiphertext {
            slots: self.rotated(&ct.slots, k),
            level: ct.level,
            key_id: ct.key_id,
        })
    }

    fn hoist(&self, ct: &Self::Ciphertext) -> Result<Self::HoistDigits> {
        Ok(RefHoistDigits { level: ct.level })
    }

    fn rotate_hoisted(
        &self,
        ct: &Self::Ciphertext,
        digits: &Self::HoistDigits,
        k: i32,
    ) -> Result<Self::Ciphertext> {
        // digits are only valid for the ciphertext they were hoisted from
        self.check_levels(ct.level, digits.level)?;
        self.rotate(ct, k)
    }

    fn sum_first(&self, ct: &Self::Ciphertext, k: usize) -> Result<Self::Ciphertext> {
        if !self.keys.borrow().sum_keys {
            return Err(EvalError::MissingSumKeys);
        }
        let n = ct.slots.len();
        let mut prefix = vec![0.0; 2 * n + 1];
        for i in 0..2 * n {
            prefix[i + 1] = prefix[i] + ct.slots[i % n];
        }
        let slots = (0..n).map(|i| prefix[i + k] - prefix[i]).collect();
        Ok(RefCiphertext { slots, level: ct.level, key_id: ct.key_id })
    }

    fn merge(&self, cts: &[Self::Ciphertext]) -> Result<Self::Ciphertext> {
        let first = cts
            .first()
            .ok_or_else(|| EvalError::InvalidParams("merge of nothing".into()))?;
        for k in 1..=cts.len() as i32 {
            self.check_rotation_key(k)?;
        }
        let level = self.spend(first.level, 1)?;
        let mut slots = vec![0.0; first.slots.len()];
        for (i, ct) in cts.iter().enumerate() {
            self.check_levels(first.level, ct.level)?;
            slots[i] = ct.slots[0];
        }
        Ok(RefCiphertext { slots, level, key_id: first.key_id })
    }

    fn bootstrap(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        Ok(RefCiphertext {
            slots: ct.slots.clone(),
            level: self.geometry.bootstrap_level,
            key_id: ct.key_id,
        })
    }

    fn chebyshev(
        &self,
        f: &dyn Fn(f64) -> f64,
        ct: &Self::Ciphertext,
        lo: f64,
        hi: f64,
        degree: usize,
    ) -> Result<Self::Ciphertext> {
        if degree == 0 || hi <= lo {
            return Err(EvalError::InvalidParams("degenerate Chebyshev domain".into()));
        }
        let level = self.spend(ct.level, depth::chebyshev(degree))?;
        let coeffs = chebyshev_coefficients(f, lo, hi, degree);
        let slots = ct
            .slots
            .iter()
            .map(|&x| {
                let t = (2.0 * x - lo - hi) / (hi - lo);
                clenshaw(&coeffs, t)
            })
            .collect();
        Ok(RefCiphertext { slots, level, key_id: ct.key_id })
    }

    fn load_rotation_keys(&self, offsets: &[i32]) {
        let mut keys = self.keys.borrow_mut();
        keys.rotation.clear();
        keys.rotation.extend(offsets.iter().copied().filter(|&k| k != 0));
    }

    fn clear_rotation_keys(&self) {
        self.keys.borrow_mut().rotation.clear();
    }

    fn load_sum_keys(&self) {
        self.keys.borrow_mut().sum_keys = true;
    }
}

/// Chebyshev interpolation coefficients of `f` over `[lo, hi]` at the
/// degree+1 cosine nodes.
fn chebyshev_coefficients(f: &dyn Fn(f64) -> f64, lo: f64, hi: f64, degree: usize) -> Vec<f64> {
    let n = degree + 1;
    let samples: Vec<f64> = (0..n)
        .map(|j| {
            let theta = std::f64::consts::PI * (j as f64 + 0.5) / n as f64;
            let x = theta.cos();
            f(lo + (hi - lo) * (x + 1.0) / 2.0)
        })
        .collect();
    (0..n)
        .map(|k| {
            let s: f64 = samples
                .iter()
                .enumerate()
                .map(|(j, &fv)| {
                    let theta = std::f64::consts::PI * (j as f64 + 0.5) / n as f64;
                    fv * (k as f64 * theta).cos()
                })
                .sum();
            2.0 * s / n as f64
        })
        .collect()
}

/// Apply the same Chebyshev interpolant the backend evaluates to a plain
/// float vector. Lets plaintext mirrors of a network reproduce the encrypted
/// activation bit for bit.
pub fn chebyshev_map(
    f: &dyn Fn(f64) -> f64,
    lo: f64,
    hi: f64,
    degree: usize,
    values: &[f64],
) -> Vec<f64> {
    let coeffs = chebyshev_coefficients(f, lo, hi, degree);
    values
        .iter()
        .map(|&x| {
            let t = (2.0 * x - lo - hi) / (hi - lo);
            clenshaw(&coeffs, t)
        })
        .collect()
}

/// Clenshaw recurrence for sum_k' c_k T_k(t).
fn clenshaw(coeffs: &[f64], t: f64) -> f64 {
    let mut b1 = 0.0;
    let mut b2 = 0.0;
    for &c in coeffs.iter().skip(1).rev() {
        let b = 2.0 * t * b1 - b2 + c;
        b2 = b1;
        b1 = b;
    }
    t * b1 - b2 + 0.5 * coeffs[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ReferenceBackend {
        let mut be = ReferenceBackend::new(&CkksParams {
            num_slots: 16,
            depth: 10,
            bootstrap_level: 6,
        });
        be.generate_keys(7);
        be
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let be = backend();
        let pt = be.encode(&[1.5, -2.25, 3.0], be.geometry().max_level).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let dec = be.decrypt(&ct).unwrap();
        assert!((dec[0] - 1.5).abs() < 2f64.powi(-30));
        assert!((dec[1] + 2.25).abs() < 2f64.powi(-30));
        assert_eq!(dec[3], 0.0);
    }

    #[test]
    fn rotation_requires_loaded_key() {
        let be = backend();
        let pt = be.encode(&[1.0, 2.0, 3.0, 4.0], 10).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        assert!(matches!(be.rotate(&ct, 1), Err(EvalError::MissingRotationKey(1))));
        be.load_rotation_keys(&[1]);
        let rot = be.rotate(&ct, 1).unwrap();
        assert_eq!(rot.slots[0], 2.0);
        assert_eq!(rot.slots[15], 1.0);
    }

    #[test]
    fn mul_plain_consumes_a_level_and_checks_encoding_level() {
        let be = backend();
        let pt = be.encode(&[2.0; 4], 10).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let mask = be.encode(&[0.5; 16], 10).unwrap();
        let out = be.mul_plain(&ct, &mask).unwrap();
        assert_eq!(out.level, 9);
        assert_eq!(out.slots[0], 1.0);

        let wrong = be.encode(&[0.5; 16], 8).unwrap();
        assert!(matches!(
            be.mul_plain(&ct, &wrong),
            Err(EvalError::LevelMismatch { expected: 10, actual: 8 })
        ));
    }

    #[test]
    fn merge_needs_prefix_keys_and_one_level() {
        let be = backend();
        let cts: Vec<_> = (0..3)
            .map(|i| {
                let pt = be.encode(&[i as f64 + 1.0], 10).unwrap();
                be.encrypt(&pt).unwrap()
            })
            .collect();
        assert!(be.merge(&cts).is_err());
        be.load_rotation_keys(&[1, 2, 3]);
        let merged = be.merge(&cts).unwrap();
        assert_eq!(&merged.slots[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(merged.level, 9);
    }

    #[test]
    fn sum_first_sums_exactly_k_slots() {
        let be = backend();
        be.load_sum_keys();
        let pt = be.encode(&[1.0, 2.0, 3.0, 4.0, 100.0], 10).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let sum = be.sum_first(&ct, 4).unwrap();
        assert_eq!(sum.slots[0], 10.0);
    }

    #[test]
    fn ciphertext_product_needs_matching_levels() {
        let be = backend();
        let a = be.encrypt(&be.encode(&[2.0, 3.0], 10).unwrap()).unwrap();
        let b = be.encrypt(&be.encode(&[4.0, 5.0], 10).unwrap()).unwrap();
        let prod = be.mul(&a, &b).unwrap();
        assert_eq!(prod.slots[0], 8.0);
        assert_eq!(prod.slots[1], 15.0);
        assert_eq!(prod.level, 9);
        let shallow = be.bootstrap(&b).unwrap();
        assert!(be.mul(&a, &shallow).is_err());
    }

    #[test]
    fn bootstrap_restores_the_configured_budget() {
        let be = backend();
        let pt = be.encode(&[1.0], 2).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let fresh = be.bootstrap(&ct).unwrap();
        assert_eq!(fresh.level, 6);
        assert_eq!(fresh.slots[0], 1.0);
    }

    #[test]
    fn chebyshev_consumes_the_modelled_depth() {
        let be = backend();
        let pt = be.encode(&[0.5, -0.5], 10).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let out = be.chebyshev(&|x| x * x, &ct, -1.0, 1.0, 3).unwrap();
        assert_eq!(out.level, 10 - depth::chebyshev(3));
        // degree-3 interpolation reproduces x^2 exactly
        assert!((out.slots[0] - 0.25).abs() < 1e-12);
        assert!((out.slots[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn serialization_is_byte_stable() {
        let be = backend();
        let pt = be.encode(&[1.0, -2.0], 5).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        let bytes = ReferenceBackend::serialize_ciphertext(&ct);
        let back = ReferenceBackend::deserialize_ciphertext(&bytes).unwrap();
        assert_eq!(back, ct);
        assert_eq!(ReferenceBackend::serialize_ciphertext(&back), bytes);

        let offsets = vec![-8, -1, 1, 4];
        let kb = ReferenceBackend::serialize_rotation_keys(&offsets);
        assert_eq!(ReferenceBackend::deserialize_rotation_keys(&kb).unwrap(), offsets);
    }

    #[test]
    fn recorder_captures_invoked_offsets() {
        let be = backend();
        be.load_rotation_keys(&[1, 4, -2]);
        let pt = be.encode(&[1.0; 8], 10).unwrap();
        let ct = be.encrypt(&pt).unwrap();
        be.start_recording();
        be.rotate(&ct, 4).unwrap();
        be.rotate(&ct, -2).unwrap();
        be.rotate(&ct, 0).unwrap();
        let rec = be.take_recorded();
        assert_eq!(rec.into_iter().collect::<Vec<_>>(), vec![-2, 4]);
    }
}
