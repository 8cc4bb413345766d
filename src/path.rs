//! Path expression resolver
//!
//! Variables are addressed by C-shaped path expressions: member selection
//! (`.` and `->`), dereference (`*`), casts (`(type) expr`), and index
//! ranges (`a[2:8:2,0]`). Resolution never materializes intermediate
//! data; it walks the expression left to right, pushing one locator per
//! step onto an explicit stack, then reduces the stack to a single
//! effective entry: a type, item count, disk address, and block list the
//! read engine can act on directly.
//!
//! Pointered steps cannot be located by arithmetic alone, so reduction
//! follows the stream: it reads the itag a dereference lands on and skips
//! whole itag trees to reach a member or array element that sits behind
//! other pointees. An index that is itself an expression (`a[n-idx]`
//! style digressions) is reduced in place, read as a scalar, and its
//! value spliced back into the enclosing expression.

use crate::chart::{deref_type, is_indirect, Chart, Dimension, Member};
use crate::engine::{
    self, hyper_count, init_dimind, read_itag, EffectiveEntry, FileCtx, IndirInfo,
};
use crate::error::{PdbError, PdbResult};
use crate::heap::{read_handle, Heap};
use crate::symtab::{SymBlock, SymbolTable};

/// The outcome of resolving one path expression.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub entry: EffectiveEntry,
    /// Output type forced by a cast prefix
    pub outtype: Option<String>,
    /// Normalized form of the expression
    pub path: String,
}

/// Resolve a path expression against the symbol table and the stream.
///
/// A name that is literally in the symbol table resolves without any
/// parsing, which keeps names containing parentheses usable.
pub fn resolve(
    ctx: &mut FileCtx,
    symtab: &SymbolTable,
    name: &str,
) -> PdbResult<ResolvedPath> {
    let name = name.trim();
    if let Some(e) = symtab.lookup(name) {
        return Ok(ResolvedPath {
            entry: EffectiveEntry::from_entry(e),
            outtype: None,
            path: name.to_string(),
        });
    }

    let toks = lex(name)?;
    if toks.is_empty() {
        return Err(PdbError::syntax(name, "empty expression"));
    }
    let mut r = Resolver {
        toks,
        pos: 0,
        expr: name.to_string(),
        stack: vec![Locator::default()],
        colon: false,
        outtype: None,
        path: String::new(),
    };
    r.variable_expression(ctx, symtab)?;
    if r.pos != r.toks.len() {
        return Err(PdbError::syntax(name, "trailing tokens after expression"));
    }
    r.reduce(ctx)?;

    let top = &r.stack[1];
    let number = if top.number < 0 { 1 } else { top.number as u64 };
    Ok(ResolvedPath {
        entry: EffectiveEntry {
            ty: top.intype.clone(),
            number,
            addr: top.addr,
            dims: top.dims.clone().unwrap_or_default(),
            blocks: top.blocks.clone().unwrap_or_default(),
            indir: top.indir,
        },
        outtype: r.outtype,
        path: r.path,
    })
}

/// Read a path that names a character pointer and return its string
/// value. Used for cast controllers; anything unreadable or null yields
/// `None` so the caller can fall back to the declared type.
fn read_string_value(
    ctx: &mut FileCtx,
    symtab: &SymbolTable,
    path: &str,
) -> PdbResult<Option<String>> {
    let rp = resolve(ctx, symtab, path)?;
    if !is_indirect(&rp.entry.ty) {
        return Ok(None);
    }
    let n = rp.entry.number.max(1) as usize;
    let mut out = vec![0u8; n * 8];
    let mut scratch = Heap::new();
    let ty = rp.entry.ty.clone();
    engine::read_entry(ctx, &rp.entry, &ty, &mut out, &mut scratch)?;
    let h = read_handle(&out, 0)?;
    if h.is_null() {
        return Ok(None);
    }
    let bytes = scratch.get(h)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(Some(String::from_utf8_lossy(&bytes[..end]).into_owned()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Dot,
    Comma,
    Colon,
    Star,
    Arrow,
    Int(i64),
    Ident(String),
}

fn parse_integer(text: &str) -> Option<i64> {
    let (neg, t) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let v = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8).ok()?
    } else {
        t.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}

/// Split an expression into tokens. `[` and `(` are interchangeable, as
/// are their closers; `->` is one token and a lone `-` sticks to the
/// number it signs.
fn lex(s: &str) -> PdbResult<Vec<Token>> {
    let mut toks = Vec::new();
    let mut buf = String::new();
    let mut it = s.chars().peekable();

    fn flush(buf: &mut String, toks: &mut Vec<Token>, src: &str) -> PdbResult<()> {
        let t = buf.trim();
        if !t.is_empty() {
            if t.contains(char::is_whitespace) {
                return Err(PdbError::syntax(src, format!("broken token {:?}", t)));
            }
            match parse_integer(t) {
                Some(v) => toks.push(Token::Int(v)),
                None => toks.push(Token::Ident(t.to_string())),
            }
        }
        buf.clear();
        Ok(())
    }

    while let Some(c) = it.next() {
        match c {
            '(' | '[' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Open);
            }
            ')' | ']' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Close);
            }
            '.' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Dot);
            }
            ',' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Comma);
            }
            ':' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Colon);
            }
            '*' => {
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Star);
            }
            '-' if it.peek() == Some(&'>') => {
                it.next();
                flush(&mut buf, &mut toks, s)?;
                toks.push(Token::Arrow);
            }
            _ => buf.push(c),
        }
    }
    flush(&mut buf, &mut toks, s)?;
    Ok(toks)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cmd {
    Goto,
    Member,
    Index,
    Cast,
    Deref,
    Result,
}

/// One step of a partially resolved path.
#[derive(Clone, Debug)]
struct Locator {
    intype: String,
    cmmnd: Cmd,
    addr: i64,
    number: i64,
    dims: Option<Vec<Dimension>>,
    blocks: Option<Vec<SymBlock>>,
    /// For entry steps: the entry has no dimensions and refers to
    /// dynamically allocated data
    indirect: bool,
    /// Indirect members sitting before this member in its parent
    n_struct_ptr: i64,
    /// Item offset selected by an index step
    n_array_items: i64,
    indir: IndirInfo,
}

impl Default for Locator {
    fn default() -> Locator {
        Locator {
            intype: String::new(),
            cmmnd: Cmd::Result,
            addr: 0,
            number: 0,
            dims: None,
            blocks: None,
            indirect: false,
            n_struct_ptr: 0,
            n_array_items: 0,
            indir: IndirInfo::default(),
        }
    }
}

struct Resolver {
    toks: Vec<Token>,
    pos: usize,
    expr: String,
    /// Locator stack; slot 0 is an unused base so indices match step
    /// counts
    stack: Vec<Locator>,
    /// A ranged index has been seen; nothing may be selected below one
    colon: bool,
    outtype: Option<String>,
    path: String,
}

impl Resolver {
    fn top(&self) -> usize {
        self.stack.len() - 1
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_ident(&mut self) -> PdbResult<String> {
        match self.bump() {
            Some(Token::Ident(s)) => {
                if self.colon {
                    return Err(PdbError::syntax(
                        &self.expr,
                        "a ranged index may only appear on the final step",
                    ));
                }
                Ok(s)
            }
            Some(Token::Int(v)) => {
                if self.colon {
                    return Err(PdbError::syntax(
                        &self.expr,
                        "a ranged index may only appear on the final step",
                    ));
                }
                Ok(v.to_string())
            }
            _ => Err(PdbError::syntax(&self.expr, "expected a name")),
        }
    }

    fn expect_close(&mut self) -> PdbResult<()> {
        match self.bump() {
            Some(Token::Close) => Ok(()),
            _ => Err(PdbError::syntax(&self.expr, "unbalanced index brackets")),
        }
    }

    fn shift(
        &mut self,
        ty: &str,
        dims: Option<Vec<Dimension>>,
        blocks: Option<Vec<SymBlock>>,
        number: i64,
        addr: i64,
        indirect: bool,
        cmmnd: Cmd,
    ) -> PdbResult<()> {
        if ty.is_empty() {
            return Err(PdbError::type_err("path step has no type"));
        }
        self.stack.push(Locator {
            intype: ty.to_string(),
            cmmnd,
            addr,
            number,
            dims,
            blocks,
            indirect,
            n_struct_ptr: 0,
            n_array_items: 0,
            indir: IndirInfo::default(),
        });
        Ok(())
    }

    fn variable_expression(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
    ) -> PdbResult<()> {
        match self.peek() {
            Some(Token::Open) => {
                // a parenthesis in prefix position can only open a cast
                self.bump();
                let base = match self.bump() {
                    Some(Token::Ident(s)) => s,
                    _ => return Err(PdbError::syntax(&self.expr, "expected a type name in cast")),
                };
                let mut ty = base;
                while self.peek() == Some(&Token::Star) {
                    self.bump();
                    ty = crate::chart::ref_type(&ty);
                }
                self.expect_close()?;
                self.variable_expression(ctx, symtab)?;
                self.do_cast(&ty)
            }
            Some(Token::Star) => {
                self.bump();
                self.variable_expression(ctx, symtab)?;
                self.do_deref()
            }
            _ => self.postfix_expression(ctx, symtab),
        }
    }

    fn postfix_expression(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
    ) -> PdbResult<()> {
        let name = self.expect_ident()?;
        self.do_goto(ctx, symtab, &name)?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let m = self.expect_ident()?;
                    self.do_member(ctx, symtab, &m, false)?;
                }
                Some(Token::Arrow) => {
                    self.bump();
                    let m = self.expect_ident()?;
                    self.do_member(ctx, symtab, &m, true)?;
                }
                Some(Token::Open) => {
                    self.bump();
                    let expr = self.index_expression(ctx, symtab)?;
                    self.expect_close()?;
                    self.do_index(ctx, &expr)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn index_expression(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
    ) -> PdbResult<String> {
        let mut parts = vec![self.range(ctx, symtab)?];
        while self.peek() == Some(&Token::Comma) {
            self.bump();
            parts.push(self.range(ctx, symtab)?);
        }
        Ok(parts.join(","))
    }

    fn range(&mut self, ctx: &mut FileCtx, symtab: &SymbolTable) -> PdbResult<String> {
        let a = self.index(ctx, symtab)?;
        if self.peek() != Some(&Token::Colon) {
            return Ok(a);
        }
        self.bump();
        let b = self.index(ctx, symtab)?;
        if a != b {
            self.colon = true;
        }
        if self.peek() != Some(&Token::Colon) {
            return Ok(format!("{}:{}", a, b));
        }
        self.bump();
        let c = self.index(ctx, symtab)?;
        Ok(format!("{}:{}:{}", a, b, c))
    }

    fn index(&mut self, ctx: &mut FileCtx, symtab: &SymbolTable) -> PdbResult<String> {
        if let Some(Token::Int(v)) = self.peek() {
            let v = *v;
            self.bump();
            return Ok(v.to_string());
        }
        // a digression: the index is itself a variable expression,
        // reduced in place and read as a scalar
        let saved_path = self.path.clone();
        self.variable_expression(ctx, symtab)?;
        let val = self.reduce(ctx)?;
        self.path = saved_path;
        Ok(val.to_string())
    }

    fn do_goto(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
        name: &str,
    ) -> PdbResult<()> {
        let e = symtab
            .lookup(name)
            .ok_or_else(|| PdbError::UnknownVariable { name: name.to_string() })?;

        let mut addr = e.addr();
        let dp = ctx.chart.lookup_required(&e.ty)?;
        if dp.size_bits > 0 && addr > 0 {
            // bit addressed entries live in negative bit space
            addr *= -8;
        }

        // no dimensions means the entry refers to dynamically allocated
        // data, not that its type is indirect
        let indirect = e.dims.is_empty();
        let dims = (!e.dims.is_empty()).then(|| e.dims.clone());
        let blocks = (!e.blocks.is_empty()).then(|| e.blocks.clone());
        let ty = e.ty.clone();
        let number = e.number as i64;

        self.path = name.to_string();
        self.shift(&ty, dims, blocks, number, addr, indirect, Cmd::Goto)
    }

    fn do_deref(&mut self) -> PdbResult<()> {
        let t = self.stack[self.top()].intype.clone();
        self.shift(&t, None, None, -1, 0, false, Cmd::Deref)?;
        let n = self.top();
        self.stack[n].intype = deref_type(&self.stack[n].intype);
        Ok(())
    }

    fn do_member(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
        name: &str,
        deref_first: bool,
    ) -> PdbResult<()> {
        if deref_first {
            self.do_deref()?;
            self.path = format!("{}->{}", self.path, name);
        } else {
            self.path = format!("{}.{}", self.path, name);
        }

        let ty = self.stack[self.top()].intype.clone();
        if is_indirect(&ty) {
            return Err(PdbError::type_err(format!(
                "expression of type {:?} must be dereferenced before selecting {:?}",
                ty, name
            )));
        }
        let dp = ctx.chart.lookup_required(&ty)?;

        let mut nsitems = 0i64;
        for m in dp.members.clone() {
            if m.name == name {
                let mtype = self.member_true_type(ctx, symtab, &m)?;
                let dims = (!m.dims.is_empty()).then(|| m.dims.clone());
                let indirect = is_indirect(&mtype);
                self.shift(
                    &mtype,
                    dims,
                    None,
                    m.number as i64,
                    m.offset as i64,
                    indirect,
                    Cmd::Member,
                )?;
                let n = self.top();
                self.stack[n].n_struct_ptr = nsitems;
                return Ok(());
            }
            if is_indirect(&m.ty) {
                nsitems += m.number as i64;
            }
        }
        Err(PdbError::UnknownMember { ty, member: name.to_string() })
    }

    /// The member's declared type, or the value of its cast controller
    /// read through a sibling path.
    fn member_true_type(
        &mut self,
        ctx: &mut FileCtx,
        symtab: &SymbolTable,
        m: &Member,
    ) -> PdbResult<String> {
        let controller = match &m.cast_memb {
            Some(c) => c.clone(),
            None => return Ok(m.ty.clone()),
        };
        let base = match self.path.rfind(|c| c == '.' || c == '>') {
            Some(i) => &self.path[..=i],
            None => "",
        };
        let cpath = format!("{}{}", base, controller);
        match read_string_value(ctx, symtab, &cpath) {
            Ok(Some(s)) if !s.is_empty() => Ok(s),
            _ => Ok(m.ty.clone()),
        }
    }

    fn do_index(&mut self, ctx: &mut FileCtx, expr: &str) -> PdbResult<()> {
        self.path = format!("{}[{}]", self.path, expr);
        let doff = ctx.default_offset;
        let cur = self.stack[self.top()].clone();

        let (t, number, start, indirect, dims, blocks);
        if let Some(d) = cur.dims.clone().filter(|d| !d.is_empty()) {
            let (n, offs) = hyper_count(expr, &d, ctx.major_order, doff)?;
            t = deref_type(&cur.intype);
            number = n as i64;
            start = offs;
            indirect = false;
            dims = Some(d);
            blocks = cur.blocks.clone();
        } else if is_indirect(&cur.intype) {
            self.do_deref()?;
            // only the first range applies to a pointer
            let first = expr.split(',').next().unwrap_or("");
            let pi = init_dimind(doff, 0, first)?;
            t = self.stack[self.top()].intype.clone();
            number = (pi.stop - pi.start) / pi.step + 1;
            start = pi.start;
            indirect = true;
            dims = None;
            blocks = None;
        } else {
            return Err(PdbError::NotIndexable { name: self.path.clone() });
        }

        let bpi = ctx.chart.size_of(&t)? as i64;
        let addr = start * bpi;
        self.shift(&t, dims, blocks, number, addr, indirect, Cmd::Index)?;
        let n = self.top();
        self.stack[n].n_array_items = start;
        Ok(())
    }

    fn do_cast(&mut self, ty: &str) -> PdbResult<()> {
        self.path = format!("({}) {}", ty, self.path);
        let cur = self.stack[self.top()].clone();
        self.shift(
            &cur.intype.clone(),
            cur.dims,
            cur.blocks,
            cur.number,
            cur.addr,
            cur.indirect,
            Cmd::Cast,
        )?;
        self.outtype = Some(ty.to_string());
        Ok(())
    }

    /// Reduce the stack from the most recent entry step to the top into
    /// one locator. An interior reduction is a digression; its single
    /// item is read as a `long` and returned.
    fn reduce(&mut self, ctx: &mut FileCtx) -> PdbResult<i64> {
        let nmx = self.top();
        let ty = self.stack[nmx].intype.clone();
        let mut numb = self.stack[nmx].number;
        let mut dims = self.stack[nmx].dims.clone();

        let mut i = nmx;
        while i > 1 && self.stack[i].cmmnd != Cmd::Goto {
            i -= 1;
        }
        let nmn = i.max(1);

        let mut addr = 0i64;
        let mut iloc = IndirInfo::default();
        for j in nmn..=nmx {
            match self.stack[j].cmmnd {
                Cmd::Deref => addr = self.deref_addr(ctx, j)?,
                Cmd::Index => {
                    addr = self.index_deref(ctx, j, &mut dims, &mut numb)?;
                    iloc = self.stack[j].indir;
                }
                Cmd::Member => addr = self.member_deref(ctx, j)?,
                Cmd::Cast => {}
                _ => {
                    addr += self.stack[j].addr;
                    self.stack[j].addr = addr;
                }
            }
        }

        let blocks = self.stack[nmx].blocks.clone();

        if nmn != 1 {
            // digression interior: must reduce to one scalar index
            if numb != 1 {
                return Err(PdbError::type_err(
                    "an index expression must reduce to a single value",
                ));
            }
            let ity = self.stack[nmx].intype.clone();
            let ep = EffectiveEntry {
                ty: ity,
                number: 1,
                addr,
                dims: Vec::new(),
                blocks: Vec::new(),
                indir: IndirInfo::default(),
            };
            let mut buf = [0u8; 8];
            let mut scratch = Heap::new();
            engine::read_entry(ctx, &ep, "long", &mut buf, &mut scratch)?;
            self.stack.truncate(nmn);
            Ok(i64::from_le_bytes(buf))
        } else {
            let b = &mut self.stack[1];
            b.intype = ty;
            b.number = numb;
            b.addr = addr;
            b.dims = dims;
            b.blocks = blocks;
            b.indir = iloc;
            b.cmmnd = Cmd::Result;
            self.stack.truncate(2);
            Ok(0)
        }
    }

    /// Follow a dereference: position on the pointee's itag and move the
    /// locator to its data.
    fn deref_addr(&mut self, ctx: &mut FileCtx, n: usize) -> PdbResult<i64> {
        let prev_ty = self.stack[n - 1].intype.clone();
        let bpi = ctx.chart.size_of(&prev_ty)? as i64;
        let mut addr = self.stack[n - 1].addr;
        let numb = self.stack[n - 1].number;

        // top level pointers carry no stored value; leaf data is
        // followed directly by the itags of its pointees
        if !is_indirect(&prev_ty) {
            addr += numb * bpi;
        }
        ctx.stream.seek_to(addr as u64)?;
        let mut itag = read_itag(ctx.stream)?;
        if !itag.flag && itag.addr != -1 {
            ctx.stream.seek_to(itag.addr as u64)?;
            itag = read_itag(ctx.stream)?;
        }
        let addr = ctx.stream.tell()? as i64;
        let numb = itag.nitems as i64;

        if !is_indirect(&self.stack[n].intype) {
            let sp = vec![SymBlock { addr, number: numb as u64 }];
            let dims = if n + 1 == self.top() {
                Some(vec![Dimension::new(
                    ctx.default_offset,
                    ctx.default_offset + numb - 1,
                )])
            } else {
                None
            };
            self.stack[n].blocks = Some(sp.clone());
            self.stack[n].dims = dims.clone();
            if n < self.top() && self.stack[n + 1].cmmnd == Cmd::Index {
                self.stack[n + 1].blocks = Some(sp);
                self.stack[n + 1].dims = dims;
            }
        }

        self.stack[n].number = numb;
        self.stack[n].addr = addr;
        Ok(addr)
    }

    /// Locate one indexed element, skipping itag trees when the index
    /// crosses a pointered boundary.
    fn index_deref(
        &mut self,
        ctx: &mut FileCtx,
        n: usize,
        pdims: &mut Option<Vec<Dimension>>,
        pnumb: &mut i64,
    ) -> PdbResult<i64> {
        let mut nsp: Option<Vec<SymBlock>> = None;
        let mut iloc = IndirInfo::default();

        let typp = self.stack[n - 1].intype.clone();
        let ty = self.stack[n].intype.clone();
        let next_indirect = n < self.top() && is_indirect(&self.stack[n + 1].intype);
        let indx = self.stack[n].n_array_items;

        iloc.n_ind_type = num_indirects(ctx.host_chart, &ty);
        iloc.arr_offs = indx;

        let mut addr;
        if next_indirect || is_indirect(&typp) {
            let numb = self.stack[n - 1].number;
            if indx < 0 || numb < indx {
                return Err(PdbError::IndexOutOfBounds {
                    index: indx,
                    count: numb.max(0) as u64,
                });
            }

            if self.stack[n - 1].cmmnd == Cmd::Deref {
                addr = self.stack[n - 2].addr;
                ctx.stream.seek_to(addr as u64)?;
                // past the dereferenced thing, onto its pointees
                engine::skip_over(ctx, 1, true)?;
                let ni = num_indirects(ctx.host_chart, &ty);
                addr = engine::skip_over(ctx, indx * ni.max(1), false)? as i64;
            } else {
                addr = self.stack[n - 1].addr;
                if !is_indirect(&typp) {
                    let bpi = ctx.chart.size_of(&typp)? as i64;
                    addr += numb * bpi;
                    ctx.stream.seek_to(addr as u64)?;
                    let ni = num_indirects(ctx.host_chart, &typp);
                    addr = engine::skip_over(ctx, indx * ni.max(1), false)? as i64;
                } else {
                    // an array of pointers: the entry data is nothing
                    // but itags, starting right at the entry address
                    ctx.stream.seek_to(addr as u64)?;
                    *pdims = None;
                    let ni = num_indirects(ctx.host_chart, &typp);
                    engine::skip_over(ctx, indx * ni.max(1), false)?;
                    let mut itag = read_itag(ctx.stream)?;
                    if !itag.flag && itag.addr != -1 {
                        ctx.stream.seek_to(itag.addr as u64)?;
                        itag = read_itag(ctx.stream)?;
                    }
                    let numb = itag.nitems as i64;
                    *pnumb = numb;
                    self.stack[n].number = numb;
                    // past one pointer the data must be contiguous
                    if n < self.top() {
                        self.stack[n + 1].blocks = None;
                    }
                    addr = ctx.stream.tell()? as i64;
                }
            }
        } else {
            // a direct array: plain address arithmetic plus multiblock
            // adjustment
            if pdims.is_none() {
                *pdims = self.stack[n].dims.clone();
            }
            self.stack[n].dims = self.stack[n - 1].dims.clone();
            addr = self.stack[n - 1].addr;

            let bpi = ctx.chart.size_of(&ty)? as i64;
            let mut offs = self.stack[n].addr;

            let prev_items = self.stack[n - 1].number;
            iloc.addr = addr + prev_items * bpi;

            if addr >= 0 {
                if let Some(sp) = self.stack[n].blocks.clone().filter(|b| !b.is_empty()) {
                    let mut k = 0usize;
                    let nbb = loop {
                        if k >= sp.len() {
                            return Err(PdbError::IndexOutOfBounds {
                                index: self.stack[n].addr / bpi,
                                count: prev_items.max(0) as u64,
                            });
                        }
                        let nbb = sp[k].number as i64 * bpi;
                        addr = sp[k].addr;
                        if offs < nbb {
                            break nbb;
                        }
                        offs -= nbb;
                        k += 1;
                    };
                    iloc.addr = addr + nbb;

                    let mut rest = sp[k..].to_vec();
                    rest[0].number -= (offs / bpi) as u64;
                    rest[0].addr = addr + offs;
                    nsp = Some(rest);
                }
            }

            if addr < 0 {
                let dp = ctx.chart.lookup_required(&ty)?;
                addr -= (offs / bpi) * dp.size_bits as i64;
            } else {
                *pnumb = self.stack[n].number;
                addr += offs;
            }
        }

        self.stack[n].blocks = nsp;
        self.stack[n].addr = addr;
        self.stack[n].indir = iloc;
        Ok(addr)
    }

    /// Locate one member, skipping the itag trees of the indirect
    /// members that precede it when the member itself is indirect.
    fn member_deref(&mut self, ctx: &mut FileCtx, n: usize) -> PdbResult<i64> {
        let prev_cmmnd = self.stack[n - 1].cmmnd;
        let indir = is_indirect(&self.stack[n].intype);

        let mut addr;
        if prev_cmmnd == Cmd::Goto && indir {
            let prev = &self.stack[n - 1];
            let bpi = ctx.chart.size_of(&prev.intype)? as i64;
            addr = prev.addr + bpi * prev.number;
            ctx.stream.seek_to(addr as u64)?;
        } else if prev_cmmnd != Cmd::Index && indir {
            addr = self.stack[n - 2].addr;
            ctx.stream.seek_to(addr as u64)?;
            addr = engine::skip_over(ctx, 1, true)? as i64;
        } else {
            addr = self.stack[n - 1].addr;
        }

        if indir {
            let nsitems = self.stack[n].n_struct_ptr;
            ctx.stream.seek_to(addr as u64)?;
            addr = engine::skip_over(ctx, nsitems, false)? as i64;
        } else {
            addr += self.stack[n].addr;
        }

        self.stack[n].addr = addr;
        Ok(addr)
    }
}

fn num_indirects(chart: &Chart, ty: &str) -> i64 {
    chart
        .lookup(crate::chart::base_type(ty))
        .map(|d| d.n_indirects as i64)
        .unwrap_or(0)
}
