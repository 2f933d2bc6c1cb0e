//! Separate-compilation metadata: locating, validating and decoding the
//! exported interface of imported modules.
//!
//! For each import the loader probes every include directory in order:
//! a raw `<name>.gmeta` blob first, then object files (`<name>.{o,obj,a}`
//! and `lib<name>.{o,obj,a}`; ELF objects carry the blob in a `.glint`
//! section), then a reserved `<name>.s` assembly fallback. A blob must
//! begin with the fixed four-byte header; a bad header in a blob we did
//! locate is a compiler bug, not a user error.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::ast::{ExprKind, Linkage, Module, SemaState};
use crate::context::Context;
use crate::diagnostic::{self, Diagnostic, Severity};
use crate::index_vec::TypeId;
use crate::source::Location;
use crate::types::{FuncAttrs, Param, TypeKind};

pub const DEFAULT_VERSION: u8 = 1;
pub const MAGIC_BYTE0: u8 = b'g';
pub const MAGIC_BYTE1: u8 = b'l';
pub const MAGIC_BYTE2: u8 = b't';

pub const METADATA_FILE_EXTENSION: &str = ".gmeta";
pub const METADATA_SECTION_NAME: &str = ".glint";

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unrecognized object file format in {0}")]
    UnknownFormat(PathBuf),
    #[error("object file {path} has no {METADATA_SECTION_NAME} section")]
    MissingSection { path: PathBuf },
    #[error("malformed object file {path}: {reason}")]
    MalformedObject { path: PathBuf, reason: &'static str },
    #[error("malformed metadata blob: {0}")]
    MalformedBlob(&'static str),
}

/// Resolve every import of `module`, deserialising each found blob into
/// the import's scope. Returns false when any import could not be found;
/// compilation cannot continue past that.
pub fn resolve_imports(ctx: &Context, module: &mut Module) -> bool {
    for index in 0..module.imports.len() {
        let name = ctx.str(module.imports[index].name);
        let loc = module.imports[index].loc;

        let mut paths_tried = Vec::new();
        let mut blob = None;
        for dir in ctx.include_directories() {
            match probe_directory(dir, &name, &mut paths_tried) {
                Ok(Some(found)) => {
                    blob = Some(found);
                    break;
                }
                Ok(None) => {}
                Err(err @ MetadataError::Io { .. }) => {
                    ctx.issue(Diagnostic::new(Severity::Fatal, loc, err.to_string()));
                }
                Err(err) => {
                    ctx.error(loc, err.to_string());
                    return false;
                }
            }
        }

        let Some((path, blob)) = blob else {
            let mut message = format!(
                "Could not find imported module '{name}' in any include directory.\nPaths tried:"
            );
            for path in &paths_tried {
                message.push_str("\n  ");
                message.push_str(&path.display().to_string());
            }
            ctx.error(Location::default(), message);
            ctx.note(loc, "Imported here");
            return false;
        };

        debug!(module = %name, path = %path.display(), "resolved import");
        validate_header(&name, &path, &blob);
        if let Err(err) = deserialise(ctx, module, index, &blob[4..]) {
            diagnostic::ice(format!(
                "metadata for module '{name}' at {} did not decode: {err}",
                path.display()
            ));
        }
        module.imports[index].resolved = true;
    }
    true
}

/// Probe one include directory for one import, in candidate order.
fn probe_directory(
    dir: &Path,
    name: &str,
    paths_tried: &mut Vec<PathBuf>,
) -> Result<Option<(PathBuf, Vec<u8>)>, MetadataError> {
    let gmeta = dir.join(format!("{name}{METADATA_FILE_EXTENSION}"));
    paths_tried.push(gmeta.clone());
    if gmeta.exists() {
        let blob = read_file(&gmeta)?;
        if blob.is_empty() {
            return Err(MetadataError::MalformedBlob("metadata file is empty"));
        }
        return Ok(Some((gmeta, blob)));
    }

    for base in [name.to_string(), format!("lib{name}")] {
        for ext in ["o", "obj", "a"] {
            let path = dir.join(format!("{base}.{ext}"));
            paths_tried.push(path.clone());
            if !path.exists() {
                continue;
            }
            let contents = read_file(&path)?;
            let blob = extract_from_object(&path, &contents)?;
            return Ok(Some((path, blob)));
        }
    }

    let asm = dir.join(format!("{name}.s"));
    paths_tried.push(asm.clone());
    if asm.exists() {
        // Reserved: metadata recovery from assembly is not implemented.
        return Err(MetadataError::UnknownFormat(asm));
    }

    Ok(None)
}

fn read_file(path: &Path) -> Result<Vec<u8>, MetadataError> {
    std::fs::read(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn extract_from_object(path: &Path, contents: &[u8]) -> Result<Vec<u8>, MetadataError> {
    if contents.len() >= 4 && contents[..4] == ELF_MAGIC {
        let section = elf_section(contents, METADATA_SECTION_NAME).map_err(|reason| {
            MetadataError::MalformedObject {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        return section.ok_or_else(|| MetadataError::MissingSection {
            path: path.to_path_buf(),
        });
    }
    Err(MetadataError::UnknownFormat(path.to_path_buf()))
}

/// Extract a named section from a little-endian ELF64 object.
fn elf_section(elf: &[u8], wanted: &str) -> Result<Option<Vec<u8>>, &'static str> {
    let u16_at = |off: usize| -> Result<u16, &'static str> {
        elf.get(off..off + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or("truncated header")
    };
    let u32_at = |off: usize| -> Result<u32, &'static str> {
        elf.get(off..off + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or("truncated header")
    };
    let u64_at = |off: usize| -> Result<u64, &'static str> {
        elf.get(off..off + 8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .ok_or("truncated header")
    };

    if elf.len() < 64 {
        return Err("file shorter than the ELF header");
    }
    let shoff = u64_at(0x28)? as usize;
    let shentsize = u16_at(0x3A)? as usize;
    let shnum = u16_at(0x3C)? as usize;
    let shstrndx = u16_at(0x3E)? as usize;
    if shentsize < 0x40 || shstrndx >= shnum {
        return Err("bad section header table");
    }

    let section_header = |i: usize| shoff + i * shentsize;
    let strtab_off = u64_at(section_header(shstrndx) + 0x18)? as usize;
    let strtab_size = u64_at(section_header(shstrndx) + 0x20)? as usize;
    let strtab = elf
        .get(strtab_off..strtab_off + strtab_size)
        .ok_or("section name table out of bounds")?;

    for i in 0..shnum {
        let hdr = section_header(i);
        let name_off = u32_at(hdr)? as usize;
        let name_tail = strtab
            .get(name_off..)
            .ok_or("section name offset out of bounds")?;
        let name_len = name_tail
            .iter()
            .position(|&b| b == 0)
            .ok_or("unterminated section name")?;
        if &name_tail[..name_len] != wanted.as_bytes() {
            continue;
        }
        let off = u64_at(hdr + 0x18)? as usize;
        let size = u64_at(hdr + 0x20)? as usize;
        let contents = elf.get(off..off + size).ok_or("section out of bounds")?;
        return Ok(Some(contents.to_vec()));
    }
    Ok(None)
}

/// The four header bytes every metadata blob begins with. A mismatch in
/// a blob we located is an internal error.
fn validate_header(name: &str, path: &Path, blob: &[u8]) {
    let ok = blob.len() >= 4
        && blob[0] == DEFAULT_VERSION
        && blob[1] == MAGIC_BYTE0
        && blob[2] == MAGIC_BYTE1
        && blob[3] == MAGIC_BYTE2;
    if !ok {
        diagnostic::ice(format!(
            "metadata for module '{name}' at {} has invalid magic bytes",
            path.display()
        ));
    }
}

// ============================================================================
// Serialisation
// ============================================================================

const DESC_VOID: u8 = 0;
const DESC_INT: u8 = 1;
const DESC_BOOL: u8 = 2;
const DESC_BYTE: u8 = 3;
const DESC_UINT: u8 = 4;
const DESC_CINT: u8 = 5;
const DESC_POINTER: u8 = 6;
const DESC_INTEGER: u8 = 7;
const DESC_FUNCTION: u8 = 8;

const DECL_VAR: u8 = 0;
const DECL_FUNC: u8 = 1;

/// Serialise the module's exported interface to a metadata blob.
///
/// The inverse of [`deserialise`]; `glintc --emit-meta` writes the result
/// next to the output object.
pub fn serialise(ctx: &Context, module: &Module) -> Vec<u8> {
    let mut out = vec![DEFAULT_VERSION, MAGIC_BYTE0, MAGIC_BYTE1, MAGIC_BYTE2];

    let mut decls = Vec::new();
    let global = crate::index_vec::ScopeId::GLOBAL;
    for (name, ids) in module.scopes[global].symbols() {
        for &id in ids {
            if id == module.top_level_function {
                continue;
            }
            let expr = module.expr(id);
            let (tag, exported) = match &expr.kind {
                ExprKind::FuncDecl { linkage, .. } => {
                    (DECL_FUNC, matches!(linkage, Linkage::Exported))
                }
                ExprKind::VarDecl { linkage, .. } => {
                    (DECL_VAR, matches!(linkage, Linkage::Exported))
                }
                _ => continue,
            };
            if exported {
                decls.push((tag, name, expr.ty));
            }
        }
    }

    out.extend_from_slice(&(decls.len() as u32).to_le_bytes());
    for (tag, name, ty) in decls {
        out.push(tag);
        let text = ctx.str(name);
        out.extend_from_slice(&(text.len() as u16).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
        write_type(module, ty, &mut out);
    }
    out
}

fn write_type(module: &Module, ty: TypeId, out: &mut Vec<u8>) {
    match module.type_kind(ty) {
        TypeKind::Builtin(crate::types::BuiltinKind::Void) => out.push(DESC_VOID),
        TypeKind::Builtin(crate::types::BuiltinKind::Int) => out.push(DESC_INT),
        TypeKind::Builtin(crate::types::BuiltinKind::Bool) => out.push(DESC_BOOL),
        TypeKind::Builtin(crate::types::BuiltinKind::Byte) => out.push(DESC_BYTE),
        TypeKind::Ffi(crate::types::FfiKind::CInt) => out.push(DESC_CINT),
        TypeKind::Integer { bit_width, signed } => {
            if *bit_width == 64 && !signed {
                out.push(DESC_UINT);
            } else {
                out.push(DESC_INTEGER);
                out.extend_from_slice(&bit_width.to_le_bytes());
                out.push(u8::from(*signed));
            }
        }
        TypeKind::Pointer { elem } | TypeKind::Reference { elem } => {
            out.push(DESC_POINTER);
            write_type(module, *elem, out);
        }
        TypeKind::Function { ret, params, .. } => {
            out.push(DESC_FUNCTION);
            write_type(module, *ret, out);
            out.push(params.len() as u8);
            for p in params {
                write_type(module, p.ty, out);
            }
        }
        // Only boundary-crossing types are encoded; anything else decays
        // to an opaque void pointer.
        _ => {
            out.push(DESC_POINTER);
            out.push(DESC_VOID);
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, MetadataError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(MetadataError::MalformedBlob("unexpected end of blob"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, MetadataError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, MetadataError> {
        Ok(u32::from_le_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn str(&mut self, len: usize) -> Result<&'a str, MetadataError> {
        let bytes = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(MetadataError::MalformedBlob("unexpected end of blob"))?;
        self.pos += len;
        std::str::from_utf8(bytes).map_err(|_| MetadataError::MalformedBlob("name is not UTF-8"))
    }
}

/// Decode a (header-stripped) blob into the import's declarations.
pub fn deserialise(
    ctx: &Context,
    module: &mut Module,
    import_index: usize,
    blob: &[u8],
) -> Result<(), MetadataError> {
    let scope = module.imports[import_index].scope;
    let mut reader = Reader {
        bytes: blob,
        pos: 0,
    };
    let count = reader.u32()?;
    for _ in 0..count {
        let tag = reader.u8()?;
        let len = reader.u16()? as usize;
        let name = ctx.intern(reader.str(len)?);
        let ty = read_type(module, &mut reader)?;

        let kind = match tag {
            DECL_VAR => ExprKind::VarDecl {
                name,
                init: None,
                linkage: Linkage::Imported,
            },
            DECL_FUNC => {
                let fn_scope = module.new_scope(Some(crate::index_vec::ScopeId::GLOBAL));
                ExprKind::FuncDecl {
                    name,
                    body: None,
                    scope: fn_scope,
                    linkage: Linkage::Imported,
                    param_decls: Vec::new(),
                    dangling_dynarrays: Vec::new(),
                }
            }
            _ => return Err(MetadataError::MalformedBlob("unknown declaration tag")),
        };
        let decl = module.new_expr_typed(kind, Location::default(), ty);
        module.set_state(decl, SemaState::Done);
        if tag == DECL_VAR {
            module.set_lvalue(decl, true);
        }
        let _ = module.declare(scope, name, decl);
    }
    Ok(())
}

fn read_type(module: &mut Module, reader: &mut Reader) -> Result<TypeId, MetadataError> {
    Ok(match reader.u8()? {
        DESC_VOID => TypeId::VOID,
        DESC_INT => TypeId::INT,
        DESC_BOOL => TypeId::BOOL,
        DESC_BYTE => TypeId::BYTE,
        DESC_UINT => TypeId::UINT,
        DESC_CINT => TypeId::CINT,
        DESC_POINTER => {
            let elem = read_type(module, reader)?;
            module.pointer_to(elem)
        }
        DESC_INTEGER => {
            let bit_width = reader.u16()?;
            let signed = reader.u8()? != 0;
            module.new_type_done(TypeKind::Integer { bit_width, signed })
        }
        DESC_FUNCTION => {
            let ret = read_type(module, reader)?;
            let count = reader.u8()? as usize;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                let ty = read_type(module, reader)?;
                params.push(Param {
                    name: None,
                    ty,
                    loc: Location::default(),
                });
            }
            module.new_type_done(TypeKind::Function {
                ret,
                params,
                attrs: FuncAttrs::NONE,
            })
        }
        _ => return Err(MetadataError::MalformedBlob("unknown type descriptor")),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Wrap a blob in a minimal little-endian ELF64 relocatable object
    /// with one `.glint` section.
    pub fn elf_with_glint_section(blob: &[u8]) -> Vec<u8> {
        let shstrtab = b"\0.glint\0.shstrtab\0";
        let ehsize = 64usize;
        let glint_off = ehsize;
        let strtab_off = glint_off + blob.len();
        let shoff = strtab_off + shstrtab.len();

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&1u16.to_le_bytes()); // ET_REL
        out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&(shoff as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&3u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&2u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), 64);

        out.extend_from_slice(blob);
        out.extend_from_slice(shstrtab);

        let mut section = |name_off: u32, sh_type: u32, off: usize, size: usize| {
            let mut hdr = Vec::new();
            hdr.extend_from_slice(&name_off.to_le_bytes());
            hdr.extend_from_slice(&sh_type.to_le_bytes());
            hdr.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
            hdr.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            hdr.extend_from_slice(&(off as u64).to_le_bytes());
            hdr.extend_from_slice(&(size as u64).to_le_bytes());
            hdr.extend_from_slice(&0u32.to_le_bytes()); // sh_link
            hdr.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            hdr.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
            hdr.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
            assert_eq!(hdr.len(), 64);
            hdr
        };

        // Null section, .glint, .shstrtab.
        let null = section(0, 0, 0, 0);
        let glint = section(1, 1, glint_off, blob.len());
        let names = section(8, 3, strtab_off, shstrtab.len());
        out.extend_from_slice(&null);
        out.extend_from_slice(&glint);
        out.extend_from_slice(&names);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_vec::ScopeId;

    fn exported_module(ctx: &Context) -> Module {
        let mut m = Module::new(ctx, "lib");
        let name = ctx.intern("answer");
        let decl = m.new_expr_typed(
            ExprKind::VarDecl {
                name,
                init: None,
                linkage: Linkage::Exported,
            },
            Location::default(),
            TypeId::INT,
        );
        m.declare(ScopeId::GLOBAL, name, decl).unwrap();

        let fname = ctx.intern("answer_of");
        let fn_scope = m.new_scope(Some(ScopeId::GLOBAL));
        let fn_ty = m.new_type_done(TypeKind::Function {
            ret: TypeId::INT,
            params: vec![Param {
                name: None,
                ty: TypeId::INT,
                loc: Location::default(),
            }],
            attrs: FuncAttrs::NONE,
        });
        let f = m.new_expr_typed(
            ExprKind::FuncDecl {
                name: fname,
                body: None,
                scope: fn_scope,
                linkage: Linkage::Exported,
                param_decls: Vec::new(),
                dangling_dynarrays: Vec::new(),
            },
            Location::default(),
            fn_ty,
        );
        m.declare(ScopeId::GLOBAL, fname, f).unwrap();
        m
    }

    #[test]
    fn test_blob_header() {
        let ctx = Context::default();
        let m = exported_module(&ctx);
        let blob = serialise(&ctx, &m);
        assert_eq!(&blob[..4], &[DEFAULT_VERSION, b'g', b'l', b't']);
    }

    #[test]
    fn test_serialise_deserialise_round_trip() {
        let ctx = Context::default();
        let lib = exported_module(&ctx);
        let blob = serialise(&ctx, &lib);

        let mut user = Module::new(&ctx, "user");
        let idx = user.add_import(ctx.intern("lib"), Location::default());
        deserialise(&ctx, &mut user, idx, &blob[4..]).unwrap();

        let scope = user.imports[idx].scope;
        let answer = user.find(scope, ctx.intern("answer"));
        assert_eq!(answer.len(), 1);
        assert_eq!(user.ty(answer[0]), TypeId::INT);
        assert!(user.expr(answer[0]).lvalue);

        let func = user.find(scope, ctx.intern("answer_of"));
        assert_eq!(func.len(), 1);
        assert!(user.is_function(user.ty(func[0])));
    }

    #[test]
    fn test_resolve_import_from_gmeta() {
        let ctx = Context::default();
        let lib = exported_module(&ctx);
        let blob = serialise(&ctx, &lib);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.gmeta"), &blob).unwrap();

        let mut ctx2 = Context::default();
        ctx2.add_include_directory(dir.path());
        let mut user = Module::new(&ctx2, "user");
        user.add_import(ctx2.intern("lib"), Location::default());

        assert!(resolve_imports(&ctx2, &mut user));
        assert!(user.imports[0].resolved);
        assert!(!ctx2.has_error());
    }

    #[test]
    fn test_resolve_import_from_elf_object() {
        let ctx = Context::default();
        let lib = exported_module(&ctx);
        let blob = serialise(&ctx, &lib);
        let object = test_support::elf_with_glint_section(&blob);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.o"), &object).unwrap();

        let mut ctx2 = Context::default();
        ctx2.add_include_directory(dir.path());
        let mut user = Module::new(&ctx2, "user");
        user.add_import(ctx2.intern("lib"), Location::default());

        assert!(resolve_imports(&ctx2, &mut user));
        assert!(user.imports[0].resolved);
    }

    #[test]
    fn test_missing_import_lists_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::default();
        ctx.add_include_directory(dir.path());

        let mut user = Module::new(&ctx, "user");
        user.add_import(ctx.intern("ghost"), Location::default());

        assert!(!resolve_imports(&ctx, &mut user));
        assert!(ctx.has_error());
        ctx.with_diagnostics(|d| {
            let diag = d.iter().next().unwrap();
            for candidate in [
                "ghost.gmeta",
                "ghost.o",
                "ghost.obj",
                "ghost.a",
                "libghost.o",
                "libghost.obj",
                "libghost.a",
                "ghost.s",
            ] {
                assert!(
                    diag.message.contains(candidate),
                    "missing candidate {candidate} in: {}",
                    diag.message
                );
            }
            assert_eq!(diag.notes.len(), 1);
        });
    }

    #[test]
    fn test_elf_section_extraction() {
        let payload = b"\x01gltdata".to_vec();
        let object = test_support::elf_with_glint_section(&payload);
        let section = elf_section(&object, ".glint").unwrap().unwrap();
        assert_eq!(section, payload);
        assert_eq!(elf_section(&object, ".missing").unwrap(), None);
    }
}
