//! Voice conditionals: the fixed-size summary of a reference voice that
//! parameterizes generation.
//!
//! Computed once by the speech encoder (see `ChatterboxTts::prepare_conditionals`)
//! or loaded from a persisted blob, then read-only for the rest of its life.

use std::fs;
use std::path::Path;

use crate::error::TtsError;

const COND_MAGIC: u32 = 0x434F_4E44; // "COND"
const COND_VERSION: u32 = 1;

/// Four parallel tensors produced by the speech encoder, stored as flat
/// buffers plus shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceConditionals {
    /// Conditioning embedding `[1, seq, hidden]`, the language-model prefix.
    pub cond_emb: Vec<f32>,
    pub cond_emb_shape: Vec<i64>,
    /// Speech-token prompt `[1, seq]`, consumed only by the decoder.
    pub prompt_token: Vec<i64>,
    pub prompt_token_shape: Vec<i64>,
    /// Global speaker identity vector `[1, dim]`.
    pub speaker_embeddings: Vec<f32>,
    pub speaker_embeddings_shape: Vec<i64>,
    /// Frame-level speaker features `[1, seq, dim]`.
    pub speaker_features: Vec<f32>,
    pub speaker_features_shape: Vec<i64>,
}

impl VoiceConditionals {
    /// Valid iff both the conditioning embedding and the prompt tokens are
    /// non-empty. A default-constructed value is always invalid.
    pub fn is_valid(&self) -> bool {
        !self.cond_emb.is_empty() && !self.prompt_token.is_empty()
    }

    /// Serialize to the binary blob format: magic, version, then the four
    /// arrays in fixed order, each as `{num_dims: u32, dims: [i64],
    /// byte_len: u64, raw bytes}`, all little-endian. Round trips are
    /// bit-identical.
    pub fn save(&self, path: &Path) -> Result<(), TtsError> {
        if !self.is_valid() {
            return Err(TtsError::ConditioningInvalid);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(&COND_MAGIC.to_le_bytes());
        out.extend_from_slice(&COND_VERSION.to_le_bytes());

        write_f32_section(&mut out, &self.cond_emb, &self.cond_emb_shape);
        write_i64_section(&mut out, &self.prompt_token, &self.prompt_token_shape);
        write_f32_section(&mut out, &self.speaker_embeddings, &self.speaker_embeddings_shape);
        write_f32_section(&mut out, &self.speaker_features, &self.speaker_features_shape);

        fs::write(path, out)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let data = fs::read(path)?;
        let mut pos = 0usize;

        let magic = read_u32(&data, &mut pos)?;
        if magic != COND_MAGIC {
            return Err(TtsError::VoiceBlob(format!(
                "bad magic 0x{:08X} in {}",
                magic,
                path.display()
            )));
        }
        let version = read_u32(&data, &mut pos)?;
        if version != COND_VERSION {
            return Err(TtsError::VoiceBlob(format!(
                "unsupported version {} in {}",
                version,
                path.display()
            )));
        }

        let mut conds = VoiceConditionals::default();
        let (shape, values) = read_f32_section(&data, &mut pos)?;
        conds.cond_emb = values;
        conds.cond_emb_shape = shape;

        let (shape, values) = read_i64_section(&data, &mut pos)?;
        conds.prompt_token = values;
        conds.prompt_token_shape = shape;

        let (shape, values) = read_f32_section(&data, &mut pos)?;
        conds.speaker_embeddings = values;
        conds.speaker_embeddings_shape = shape;

        let (shape, values) = read_f32_section(&data, &mut pos)?;
        conds.speaker_features = values;
        conds.speaker_features_shape = shape;

        Ok(conds)
    }
}

fn write_shape(out: &mut Vec<u8>, shape: &[i64]) {
    out.extend_from_slice(&(shape.len() as u32).to_le_bytes());
    for &dim in shape {
        out.extend_from_slice(&dim.to_le_bytes());
    }
}

fn write_f32_section(out: &mut Vec<u8>, data: &[f32], shape: &[i64]) {
    write_shape(out, shape);
    out.extend_from_slice(&((data.len() * 4) as u64).to_le_bytes());
    for &v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn write_i64_section(out: &mut Vec<u8>, data: &[i64], shape: &[i64]) {
    write_shape(out, shape);
    out.extend_from_slice(&((data.len() * 8) as u64).to_le_bytes());
    for &v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], TtsError> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| TtsError::VoiceBlob("truncated file".into()))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, TtsError> {
    let bytes = take(data, pos, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64, TtsError> {
    let bytes = take(data, pos, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_shape(data: &[u8], pos: &mut usize) -> Result<Vec<i64>, TtsError> {
    let num_dims = read_u32(data, pos)? as usize;
    let mut shape = Vec::with_capacity(num_dims);
    for _ in 0..num_dims {
        let bytes = take(data, pos, 8)?;
        shape.push(i64::from_le_bytes(bytes.try_into().unwrap()));
    }
    Ok(shape)
}

fn read_f32_section(data: &[u8], pos: &mut usize) -> Result<(Vec<i64>, Vec<f32>), TtsError> {
    let shape = read_shape(data, pos)?;
    let byte_len = read_u64(data, pos)? as usize;
    let bytes = take(data, pos, byte_len)?;
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok((shape, values))
}

fn read_i64_section(data: &[u8], pos: &mut usize) -> Result<(Vec<i64>, Vec<i64>), TtsError> {
    let shape = read_shape(data, pos)?;
    let byte_len = read_u64(data, pos)? as usize;
    let bytes = take(data, pos, byte_len)?;
    let values = bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok((shape, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_conditionals() -> VoiceConditionals {
        VoiceConditionals {
            cond_emb: vec![0.25, -1.5, 3.375, f32::MIN_POSITIVE, -0.0],
            cond_emb_shape: vec![1, 5, 1],
            prompt_token: vec![17, 4299, 6560],
            prompt_token_shape: vec![1, 3],
            speaker_embeddings: vec![0.5, 0.75],
            speaker_embeddings_shape: vec![1, 2],
            speaker_features: vec![1.0; 6],
            speaker_features_shape: vec![1, 2, 3],
        }
    }

    #[test]
    fn default_conditionals_are_invalid() {
        assert!(!VoiceConditionals::default().is_valid());
    }

    #[test]
    fn validity_needs_both_cond_emb_and_prompt_token() {
        let mut conds = VoiceConditionals::default();
        conds.cond_emb = vec![1.0];
        assert!(!conds.is_valid());
        conds.prompt_token = vec![1];
        assert!(conds.is_valid());
    }

    #[test]
    fn save_refuses_invalid_conditionals() {
        let path = std::env::temp_dir().join("chatterbox_cond_invalid.bin");
        let err = VoiceConditionals::default().save(&path).unwrap_err();
        assert!(matches!(err, TtsError::ConditioningInvalid));
    }

    #[test]
    fn round_trip_is_bit_identical() {
        let path = std::env::temp_dir().join("chatterbox_cond_roundtrip.bin");
        let original = example_conditionals();
        original.save(&path).unwrap();

        let loaded = VoiceConditionals::load(&path).unwrap();
        assert_eq!(loaded, original);
        // -0.0 == 0.0 under PartialEq; check the sign bit survived too.
        assert_eq!(
            loaded.cond_emb[4].to_bits(),
            original.cond_emb[4].to_bits()
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = std::env::temp_dir().join("chatterbox_cond_badmagic.bin");
        std::fs::write(&path, [0u8; 32]).unwrap();
        let err = VoiceConditionals::load(&path).unwrap_err();
        assert!(matches!(err, TtsError::VoiceBlob(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let path = std::env::temp_dir().join("chatterbox_cond_truncated.bin");
        let original = example_conditionals();
        original.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, bytes).unwrap();

        let err = VoiceConditionals::load(&path).unwrap_err();
        assert!(matches!(err, TtsError::VoiceBlob(_)));
        let _ = std::fs::remove_file(&path);
    }
}
