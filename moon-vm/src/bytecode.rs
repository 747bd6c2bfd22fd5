//! The bytecode model: prototypes, constants, and the binary image format.
//!
//! A [`Proto`] is immutable once published; closures share it by `Rc`. The
//! on-disk image is a small header followed by the top-level prototype,
//! nested prototypes recursing in place.

use std::rc::Rc;

use moon_asm::Instruction;

use crate::consts::MAX_PROTO_DEPTH;

/// Image magic: escape byte plus "MLB".
pub const IMAGE_SIGNATURE: [u8; 4] = *b"\x1bMLB";
/// Image format version.
pub const IMAGE_VERSION: u8 = 1;
/// Declared sizes: instruction, integer, number.
pub const IMAGE_SIZES: [u8; 3] = [4, 8, 8];

/// A compiled function prototype.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Proto {
    /// Instruction stream.
    pub code: Vec<Instruction>,
    /// Constant pool.
    pub k: Vec<Constant>,
    /// Nested prototypes, indexed by `CLOSURE`.
    pub protos: Vec<Rc<Proto>>,
    /// Upvalue capture descriptors.
    pub upvalues: Vec<UpvalDesc>,
    /// Number of fixed parameters.
    pub numparams: u8,
    /// Whether the function accepts varargs.
    pub is_vararg: bool,
    /// Register window size.
    pub maxstacksize: u8,
    /// Source name, may be stripped.
    pub source: Option<String>,
    /// Source line per instruction, may be stripped or shorter than `code`.
    pub lineinfo: Vec<u32>,
}

impl Proto {
    /// Number of upvalues.
    pub fn nups(&self) -> u8 {
        self.upvalues.len() as u8
    }

    /// Source line of the instruction at `pc`, when debug info is present.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.lineinfo.get(pc).copied()
    }
}

/// How a `CLOSURE` captures one upvalue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Capture the enclosing frame's local at stack slot `idx` when true;
    /// copy the enclosing closure's upvalue `idx` otherwise.
    pub instack: bool,
    /// Slot or upvalue index, per `instack`.
    pub idx: u8,
}

/// A constant-pool entry. Plain data; string constants intern into the
/// heap when materialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `nil`
    Nil,
    /// `true`/`false`
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Byte string
    Str(Vec<u8>),
}

const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;

/// Rejections from [`load`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// The image ends before a field completes.
    #[error("truncated image")]
    Truncated,
    /// The magic bytes are wrong.
    #[error("bad signature")]
    BadSignature,
    /// Unsupported format version.
    #[error("unsupported version {0}")]
    BadVersion(u8),
    /// The size declarations disagree with this build.
    #[error("bad size declarations")]
    BadSizes,
    /// Unknown constant tag byte.
    #[error("bad constant tag {0}")]
    BadConstantTag(u8),
    /// An instruction's opcode byte decodes to nothing.
    #[error("invalid opcode at instruction {0}")]
    BadOpcode(usize),
    /// Prototype nesting exceeds the loader's limit.
    #[error("prototype nesting too deep")]
    TooDeep,
}

/// Serialize a prototype tree. `strip` drops source names and line info.
pub fn dump(proto: &Proto, strip: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&IMAGE_SIGNATURE);
    out.push(IMAGE_VERSION);
    out.extend_from_slice(&IMAGE_SIZES);
    dump_proto(proto, strip, &mut out);
    out
}

fn dump_proto(proto: &Proto, strip: bool, out: &mut Vec<u8>) {
    out.push(proto.numparams);
    out.push(proto.is_vararg as u8);
    out.push(proto.maxstacksize);
    out.push(proto.nups());

    out.extend_from_slice(&(proto.code.len() as u32).to_le_bytes());
    for inst in &proto.code {
        out.extend_from_slice(&inst.to_bytes());
    }

    out.extend_from_slice(&(proto.k.len() as u32).to_le_bytes());
    for k in &proto.k {
        match k {
            Constant::Nil => out.push(TAG_NIL),
            Constant::Boolean(false) => out.push(TAG_FALSE),
            Constant::Boolean(true) => out.push(TAG_TRUE),
            Constant::Integer(i) => {
                out.push(TAG_INTEGER);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Constant::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Constant::Str(bytes) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    out.extend_from_slice(&(proto.upvalues.len() as u32).to_le_bytes());
    for uv in &proto.upvalues {
        out.push(uv.instack as u8);
        out.push(uv.idx);
    }

    out.extend_from_slice(&(proto.protos.len() as u32).to_le_bytes());
    for p in &proto.protos {
        dump_proto(p, strip, out);
    }

    if strip {
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
    } else {
        let source = proto.source.as_deref().unwrap_or("");
        out.extend_from_slice(&(source.len() as u32).to_le_bytes());
        out.extend_from_slice(source.as_bytes());
        out.extend_from_slice(&(proto.lineinfo.len() as u32).to_le_bytes());
        for line in &proto.lineinfo {
            out.extend_from_slice(&line.to_le_bytes());
        }
    }
}

/// Parse a binary image into its top-level prototype.
pub fn load(bytes: &[u8]) -> Result<Proto, ImageError> {
    let mut r = Reader { buf: bytes, pos: 0 };
    if r.bytes(4)? != IMAGE_SIGNATURE {
        return Err(ImageError::BadSignature);
    }
    let version = r.u8()?;
    if version != IMAGE_VERSION {
        return Err(ImageError::BadVersion(version));
    }
    if r.bytes(3)? != IMAGE_SIZES {
        return Err(ImageError::BadSizes);
    }
    load_proto(&mut r, 0)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(n).ok_or(ImageError::Truncated)?;
        if end > self.buf.len() {
            return Err(ImageError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, ImageError> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(i64::from_le_bytes(buf))
    }

    fn f64(&mut self) -> Result<f64, ImageError> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }
}

fn load_proto(r: &mut Reader<'_>, depth: usize) -> Result<Proto, ImageError> {
    if depth > MAX_PROTO_DEPTH {
        return Err(ImageError::TooDeep);
    }

    let numparams = r.u8()?;
    let is_vararg = r.u8()? != 0;
    let maxstacksize = r.u8()?;
    let nups = r.u8()?;

    let code_count = r.u32()? as usize;
    let mut code = Vec::with_capacity(code_count.min(1 << 16));
    for i in 0..code_count {
        let b = r.bytes(4)?;
        let inst = Instruction::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if inst.opcode().is_none() {
            return Err(ImageError::BadOpcode(i));
        }
        code.push(inst);
    }

    let k_count = r.u32()? as usize;
    let mut k = Vec::with_capacity(k_count.min(1 << 16));
    for _ in 0..k_count {
        let tag = r.u8()?;
        k.push(match tag {
            TAG_NIL => Constant::Nil,
            TAG_FALSE => Constant::Boolean(false),
            TAG_TRUE => Constant::Boolean(true),
            TAG_INTEGER => Constant::Integer(r.i64()?),
            TAG_FLOAT => Constant::Float(r.f64()?),
            TAG_STR => {
                let len = r.u32()? as usize;
                Constant::Str(r.bytes(len)?.to_vec())
            }
            other => return Err(ImageError::BadConstantTag(other)),
        });
    }

    let upvalues_count = r.u32()? as usize;
    let mut upvalues = Vec::with_capacity(upvalues_count.min(256));
    for _ in 0..upvalues_count {
        let instack = r.u8()? != 0;
        let idx = r.u8()?;
        upvalues.push(UpvalDesc { instack, idx });
    }

    let protos_count = r.u32()? as usize;
    let mut protos = Vec::with_capacity(protos_count.min(256));
    for _ in 0..protos_count {
        protos.push(Rc::new(load_proto(r, depth + 1)?));
    }

    let source_len = r.u32()? as usize;
    let source = if source_len == 0 {
        None
    } else {
        Some(String::from_utf8_lossy(r.bytes(source_len)?).into_owned())
    };
    let lineinfo_count = r.u32()? as usize;
    let mut lineinfo = Vec::with_capacity(lineinfo_count.min(1 << 16));
    for _ in 0..lineinfo_count {
        lineinfo.push(r.u32()?);
    }

    let _ = nups;
    Ok(Proto {
        code,
        k,
        protos,
        upvalues,
        numparams,
        is_vararg,
        maxstacksize,
        source,
        lineinfo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use moon_asm::op;

    fn sample_proto() -> Proto {
        let child = Proto {
            code: vec![op::getupval(0, 0), op::return1(0)],
            upvalues: vec![UpvalDesc {
                instack: true,
                idx: 0,
            }],
            maxstacksize: 2,
            ..Default::default()
        };
        Proto {
            code: vec![
                op::loadk(0, 0),
                op::loadk(1, 1),
                op::closure(2, 0),
                op::return_(0, 4, 0),
            ],
            k: vec![
                Constant::Integer(-7),
                Constant::Str(b"hello".to_vec()),
                Constant::Float(0.5),
                Constant::Nil,
                Constant::Boolean(true),
            ],
            protos: vec![Rc::new(child)],
            numparams: 1,
            is_vararg: true,
            maxstacksize: 8,
            source: Some("sample.moon".into()),
            lineinfo: vec![1, 1, 2, 3],
            ..Default::default()
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let proto = sample_proto();
        let loaded = load(&dump(&proto, false)).unwrap();
        assert_eq!(proto, loaded);
    }

    #[test]
    fn stripped_round_trip_drops_debug_info_only() {
        let proto = sample_proto();
        let loaded = load(&dump(&proto, true)).unwrap();
        assert_eq!(loaded.source, None);
        assert!(loaded.lineinfo.is_empty());
        assert_eq!(loaded.code, proto.code);
        assert_eq!(loaded.k, proto.k);
        assert_eq!(loaded.protos.len(), 1);
        assert_eq!(loaded.upvalues, proto.upvalues);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut image = dump(&sample_proto(), true);
        image[0] = b'X';
        assert_eq!(load(&image), Err(ImageError::BadSignature));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut image = dump(&sample_proto(), true);
        image[4] = 0xff;
        assert_eq!(load(&image), Err(ImageError::BadVersion(0xff)));
    }

    #[test]
    fn truncation_is_detected() {
        let image = dump(&sample_proto(), false);
        for cut in [3, 8, 16, image.len() - 1] {
            assert_eq!(load(&image[..cut]), Err(ImageError::Truncated));
        }
    }

    #[test]
    fn invalid_opcode_bytes_are_rejected() {
        let mut proto = sample_proto();
        proto.code[1] = moon_asm::Instruction::from_raw(0x7f);
        assert_eq!(load(&dump(&proto, true)), Err(ImageError::BadOpcode(1)));
    }
}
