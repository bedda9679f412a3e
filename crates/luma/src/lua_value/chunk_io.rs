// Lua 5.2 binary chunk reader and writer.
//
// The wire format is the PUC luac layout: an 18-byte header (signature,
// version/format, layout description, tail marker) followed by the nested
// function blocks. The reader validates the layout bytes and accepts both
// 32- and 64-bit size_t chunks; the writer always emits little-endian with
// 64-bit sizes, and a round trip through dump/undump preserves every field.

use std::rc::Rc;

use crate::heap::Heap;
use crate::lua_value::{LocVar, LuaValue, Prototype, UpvalDesc};

/// `ESC "Lua"` — first bytes of every binary chunk.
pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
const VERSION: u8 = 0x52;
const FORMAT: u8 = 0;
const TAIL: &[u8; 6] = b"\x19\x93\r\n\x1a\n";

// Constant tags, from lua.h.
const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    size_t_len: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.data.len() {
            return Err("truncated chunk".to_string());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn int(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn size(&mut self) -> Result<usize, String> {
        if self.size_t_len == 4 {
            Ok(self.int()? as usize)
        } else {
            let b = self.take(8)?;
            let n = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            usize::try_from(n).map_err(|_| "chunk size overflow".to_string())
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// A dumped string: size (including the trailing NUL) then bytes.
    /// Size 0 means absent.
    fn string(&mut self) -> Result<Option<Vec<u8>>, String> {
        let n = self.size()?;
        if n == 0 {
            return Ok(None);
        }
        let bytes = self.take(n)?;
        Ok(Some(bytes[..n - 1].to_vec()))
    }
}

fn check_header(r: &mut Reader) -> Result<(), String> {
    if r.take(4)? != SIGNATURE {
        return Err("not a precompiled chunk".to_string());
    }
    if r.byte()? != VERSION {
        return Err("version mismatch in precompiled chunk".to_string());
    }
    if r.byte()? != FORMAT {
        return Err("format mismatch in precompiled chunk".to_string());
    }
    if r.byte()? != 1 {
        return Err("endianness mismatch in precompiled chunk".to_string());
    }
    if r.byte()? != 4 {
        return Err("int size mismatch in precompiled chunk".to_string());
    }
    let size_t_len = r.byte()? as usize;
    if size_t_len != 4 && size_t_len != 8 {
        return Err("size_t size mismatch in precompiled chunk".to_string());
    }
    r.size_t_len = size_t_len;
    if r.byte()? != 4 {
        return Err("instruction size mismatch in precompiled chunk".to_string());
    }
    if r.byte()? != 8 {
        return Err("number size mismatch in precompiled chunk".to_string());
    }
    if r.byte()? != 0 {
        return Err("number format mismatch in precompiled chunk".to_string());
    }
    if r.take(6)? != TAIL {
        return Err("corrupted precompiled chunk".to_string());
    }
    Ok(())
}

fn read_function(
    r: &mut Reader,
    heap: &mut Heap,
    parent_source: &str,
) -> Result<Rc<Prototype>, String> {
    let line_defined = r.int()?;
    let last_line_defined = r.int()?;
    let num_params = r.byte()?;
    let is_vararg = r.byte()? != 0;
    let max_stack_size = r.byte()?;

    let ncode = r.int()? as usize;
    let mut code = Vec::with_capacity(ncode);
    for _ in 0..ncode {
        code.push(r.int()?);
    }

    let nconst = r.int()? as usize;
    let mut constants = Vec::with_capacity(nconst);
    for _ in 0..nconst {
        let tag = r.byte()?;
        let value = match tag {
            TAG_NIL => LuaValue::Nil,
            TAG_BOOLEAN => LuaValue::Boolean(r.byte()? != 0),
            TAG_NUMBER => LuaValue::Number(r.number()?),
            TAG_STRING => {
                let bytes = r
                    .string()?
                    .ok_or_else(|| "null string constant".to_string())?;
                heap.create_string_bytes(&bytes)
                    .map_err(|e| e.to_string())?
            }
            _ => return Err(format!("bad constant tag {}", tag)),
        };
        constants.push(value);
    }

    let nproto = r.int()? as usize;
    let mut protos = Vec::with_capacity(nproto);
    for _ in 0..nproto {
        protos.push(read_function(r, heap, parent_source)?);
    }

    let nupval = r.int()? as usize;
    let mut upvalues = Vec::with_capacity(nupval);
    for _ in 0..nupval {
        let from_local = r.byte()? != 0;
        let index = r.byte()?;
        upvalues.push(UpvalDesc {
            name: "".into(),
            from_local,
            index,
        });
    }

    // Debug section (everything optional when stripped).
    let source = match r.string()? {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => parent_source.to_string(),
    };
    let nlines = r.int()? as usize;
    let mut line_info = Vec::with_capacity(nlines);
    for _ in 0..nlines {
        line_info.push(r.int()?);
    }
    let nlocs = r.int()? as usize;
    let mut loc_vars = Vec::with_capacity(nlocs);
    for _ in 0..nlocs {
        let name = r
            .string()?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let start_pc = r.int()?;
        let end_pc = r.int()?;
        loc_vars.push(LocVar {
            name: name.into(),
            start_pc,
            end_pc,
        });
    }
    let nupnames = r.int()? as usize;
    for i in 0..nupnames {
        if let Some(bytes) = r.string()? {
            if let Some(desc) = upvalues.get_mut(i) {
                desc.name = String::from_utf8_lossy(&bytes).into_owned().into();
            }
        }
    }

    heap.charge(ncode * 4 + nconst * 16 + 64).map_err(|e| e.to_string())?;

    Ok(Rc::new(Prototype {
        source: source.into(),
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code: code.into_boxed_slice(),
        constants: constants.into_boxed_slice(),
        protos: protos.into_boxed_slice(),
        upvalues: upvalues.into_boxed_slice(),
        line_info: line_info.into_boxed_slice(),
        loc_vars: loc_vars.into_boxed_slice(),
    }))
}

/// Load a binary chunk. `chunk_name` is used when the chunk was stripped.
pub fn undump_chunk(
    heap: &mut Heap,
    bytes: &[u8],
    chunk_name: &str,
) -> Result<Rc<Prototype>, String> {
    let mut r = Reader {
        data: bytes,
        pos: 0,
        size_t_len: 8,
    };
    check_header(&mut r)?;
    read_function(&mut r, heap, chunk_name)
}

// ===== writer =====

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn byte(&mut self, b: u8) {
        self.out.push(b);
    }

    fn int(&mut self, n: u32) {
        self.out.extend_from_slice(&n.to_le_bytes());
    }

    fn size(&mut self, n: usize) {
        self.out.extend_from_slice(&(n as u64).to_le_bytes());
    }

    fn number(&mut self, n: f64) {
        self.out.extend_from_slice(&n.to_le_bytes());
    }

    fn string(&mut self, s: Option<&[u8]>) {
        match s {
            None => self.size(0),
            Some(bytes) => {
                self.size(bytes.len() + 1);
                self.out.extend_from_slice(bytes);
                self.byte(0);
            }
        }
    }
}

fn write_function(w: &mut Writer, heap: &Heap, proto: &Prototype, strip: bool) {
    w.int(proto.line_defined);
    w.int(proto.last_line_defined);
    w.byte(proto.num_params);
    w.byte(proto.is_vararg as u8);
    w.byte(proto.max_stack_size);

    w.int(proto.code.len() as u32);
    for &i in proto.code.iter() {
        w.int(i);
    }

    w.int(proto.constants.len() as u32);
    for k in proto.constants.iter() {
        match k {
            LuaValue::Nil => w.byte(TAG_NIL),
            LuaValue::Boolean(b) => {
                w.byte(TAG_BOOLEAN);
                w.byte(*b as u8);
            }
            LuaValue::Number(n) => {
                w.byte(TAG_NUMBER);
                w.number(*n);
            }
            LuaValue::String(id) => {
                w.byte(TAG_STRING);
                w.string(Some(heap.string_bytes(*id)));
            }
            // The compiler only produces scalar and string constants.
            _ => w.byte(TAG_NIL),
        }
    }

    w.int(proto.protos.len() as u32);
    for child in proto.protos.iter() {
        write_function(w, heap, child, strip);
    }

    w.int(proto.upvalues.len() as u32);
    for desc in proto.upvalues.iter() {
        w.byte(desc.from_local as u8);
        w.byte(desc.index);
    }

    if strip {
        w.string(None);
        w.int(0);
        w.int(0);
        w.int(0);
    } else {
        w.string(Some(proto.source.as_bytes()));
        w.int(proto.line_info.len() as u32);
        for &l in proto.line_info.iter() {
            w.int(l);
        }
        w.int(proto.loc_vars.len() as u32);
        for lv in proto.loc_vars.iter() {
            w.string(Some(lv.name.as_bytes()));
            w.int(lv.start_pc);
            w.int(lv.end_pc);
        }
        w.int(proto.upvalues.len() as u32);
        for desc in proto.upvalues.iter() {
            w.string(Some(desc.name.as_bytes()));
        }
    }
}

/// Serialise a prototype as a Lua 5.2 binary chunk.
pub fn dump_chunk(heap: &Heap, proto: &Prototype, strip: bool) -> Vec<u8> {
    let mut w = Writer { out: Vec::new() };
    w.out.extend_from_slice(SIGNATURE);
    w.byte(VERSION);
    w.byte(FORMAT);
    w.byte(1); // little endian
    w.byte(4); // sizeof(int)
    w.byte(8); // sizeof(size_t)
    w.byte(4); // sizeof(Instruction)
    w.byte(8); // sizeof(lua_Number)
    w.byte(0); // floating point numbers
    w.out.extend_from_slice(TAIL);
    write_function(&mut w, heap, proto, strip);
    w.out
}
