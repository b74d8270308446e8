//! Line-oriented document blocks and the type and unit declarations stored in them.
//!
//! A document is a sequence of lines; `@BEGIN NAME` and `@END NAME` delimit named blocks,
//! which may nest. Reading keeps every line as written, so saving an unmodified document
//! reproduces its text byte for byte.
//!
//! ```text
//! @BEGIN UNITS
//! UNIT furlong "furlong" CATEGORY "Length" = 201.168 m
//! @END UNITS
//! @BEGIN TYPES
//! TYPE Shape TAGGED @typevar t Circle(Number{m}) | Label(@typevar t) | Blank
//! @END TYPES
//! ```

use records_model::escape::{quote, quoted_if_needed};
use records_model::{
    ParseProgress, RecordsError, RecordsResult, TagType, TypeId, TypeManager, TypeTerm,
    TypeVariableKind, UnitDeclaration,
};
use rust_decimal::Decimal;

use crate::parser::{parse_type_expression, parse_unit_expression};
use crate::save::{save_type_expression, save_unit_expression};
use crate::type_expr::{TypeExpression, UnitExpression};

pub const TYPES_BLOCK: &str = "TYPES";
pub const UNITS_BLOCK: &str = "UNITS";

const BEGIN: &str = "@BEGIN";
const END: &str = "@END";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("line {line}: @BEGIN needs a block name")]
    MissingName { line: usize },

    #[error("line {line}: @BEGIN {name} has no matching @END")]
    Unclosed { name: String, line: usize },

    #[error("line {line}: @END without a matching @BEGIN")]
    UnexpectedEnd { line: usize },

    #[error("line {line}: @END {found} closes @BEGIN {expected}")]
    MismatchedEnd {
        expected: String,
        found: String,
        line: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// A line as written, without its line terminator. `number` counts from 1.
    Line { number: usize, text: String },
    Block(Block),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    begin: String,
    pub items: Vec<Item>,
    end: String,
}

impl Block {
    /// A block holding `lines`, written with canonical `@BEGIN`/`@END` lines.
    pub fn new(name: &str, lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.to_string(),
            begin: format!("{BEGIN} {name}"),
            items: lines
                .into_iter()
                .enumerate()
                .map(|(idx, text)| Item::Line {
                    number: idx + 2,
                    text,
                })
                .collect(),
            end: format!("{END} {name}"),
        }
    }

    /// The block's own non-blank lines with their line numbers, trimmed. Nested blocks are
    /// skipped.
    pub fn lines(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.items.iter().filter_map(|item| match item {
            Item::Line { number, text } if !text.trim().is_empty() => {
                Some((*number, text.trim()))
            }
            _ => None,
        })
    }

    fn write(&self, out: &mut Vec<String>) {
        out.push(self.begin.clone());
        write_items(&self.items, out);
        out.push(self.end.clone());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    pub items: Vec<Item>,
    trailing_newline: bool,
}

fn write_items(items: &[Item], out: &mut Vec<String>) {
    for item in items {
        match item {
            Item::Line { text, .. } => out.push(text.clone()),
            Item::Block(block) => block.write(out),
        }
    }
}

/// An open block while reading: its name, `@BEGIN` line and the items read so far.
struct OpenBlock {
    name: String,
    begin: String,
    line: usize,
    items: Vec<Item>,
}

impl Document {
    pub fn read(text: &str) -> Result<Self, DocumentError> {
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let mut top = Vec::new();
        let mut open: Vec<OpenBlock> = Vec::new();
        if !text.is_empty() {
            for (idx, raw) in body.split('\n').enumerate() {
                let line_no = idx + 1;
                let line = raw.trim();
                if let Some(rest) = keyword_rest(line, BEGIN) {
                    if rest.is_empty() {
                        return Err(DocumentError::MissingName { line: line_no });
                    }
                    open.push(OpenBlock {
                        name: rest.to_string(),
                        begin: raw.to_string(),
                        line: line_no,
                        items: Vec::new(),
                    });
                    continue;
                }
                if let Some(rest) = keyword_rest(line, END) {
                    let block = open
                        .pop()
                        .ok_or(DocumentError::UnexpectedEnd { line: line_no })?;
                    if !rest.is_empty() && rest != block.name {
                        return Err(DocumentError::MismatchedEnd {
                            expected: block.name,
                            found: rest.to_string(),
                            line: line_no,
                        });
                    }
                    let item = Item::Block(Block {
                        name: block.name,
                        begin: block.begin,
                        items: block.items,
                        end: raw.to_string(),
                    });
                    match open.last_mut() {
                        Some(parent) => parent.items.push(item),
                        None => top.push(item),
                    }
                    continue;
                }
                let item = Item::Line {
                    number: line_no,
                    text: raw.to_string(),
                };
                match open.last_mut() {
                    Some(parent) => parent.items.push(item),
                    None => top.push(item),
                }
            }
        }
        if let Some(block) = open.pop() {
            return Err(DocumentError::Unclosed {
                name: block.name,
                line: block.line,
            });
        }
        Ok(Self {
            items: top,
            trailing_newline,
        })
    }

    pub fn save(&self) -> String {
        let mut lines = Vec::new();
        write_items(&self.items, &mut lines);
        let mut out = lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    /// The first top-level block called `name`.
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.items.iter().find_map(|item| match item {
            Item::Block(block) if block.name == name => Some(block),
            _ => None,
        })
    }

    /// Replaces the first top-level block with the same name, or appends `block`.
    pub fn set_block(&mut self, block: Block) {
        let existing = self
            .items
            .iter_mut()
            .find(|item| matches!(item, Item::Block(b) if b.name == block.name));
        match existing {
            Some(item) => *item = Item::Block(block),
            None => {
                self.items.push(Item::Block(block));
                self.trailing_newline = true;
            }
        }
    }
}

/// The text after `keyword` when `line` starts with it as a whole word.
fn keyword_rest<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then(|| rest.trim())
}

fn line_error(line: usize, message: impl std::fmt::Display) -> RecordsError {
    RecordsError::user(format!("line {line}: {message}"))
}

/// Registers the declarations of `document`'s UNITS and TYPES blocks, units first.
pub fn load_declarations(document: &Document, types: &mut TypeManager) -> RecordsResult<()> {
    if let Some(block) = document.block(UNITS_BLOCK) {
        let lines: Vec<_> = block.lines().collect();
        register_in_passes(&lines, |(number, line)| {
            let declaration = parse_unit_line(line, types).map_err(|e| with_line(*number, e))?;
            types
                .unit_manager_mut()
                .add_user_unit(declaration)
                .map_err(|e| with_line(*number, e))
        })?;
    }
    if let Some(block) = document.block(TYPES_BLOCK) {
        let lines: Vec<_> = block.lines().collect();
        register_in_passes(&lines, |(number, line)| {
            let (name, vars, tags) =
                parse_type_line(line, types).map_err(|e| with_line(*number, e))?;
            types
                .register_tagged_type(name, vars, tags)
                .map(|_| ())
                .map_err(|e| with_line(*number, e))
        })?;
    }
    Ok(())
}

fn with_line(line: usize, err: RecordsError) -> RecordsError {
    if err.is_internal() {
        err
    } else {
        line_error(line, err.message())
    }
}

/// Declarations may refer to ones written after them, so registration repeats over the
/// failures until a pass makes no progress. The first remaining failure is reported.
fn register_in_passes<T>(
    items: &[T],
    mut register: impl FnMut(&T) -> RecordsResult<()>,
) -> RecordsResult<()> {
    let mut pending: Vec<&T> = items.iter().collect();
    loop {
        let before = pending.len();
        let mut first_error = None;
        let mut failed = Vec::new();
        for item in pending {
            if let Err(err) = register(item) {
                first_error.get_or_insert(err);
                failed.push(item);
            }
        }
        match first_error {
            None => return Ok(()),
            Some(err) if failed.len() == before => return Err(err),
            Some(_) => pending = failed,
        }
    }
}

/// `UNIT name "description" CATEGORY "category" [PREFIX "p"] [SUFFIX "s"] [= scale unit]`
fn parse_unit_line(line: &str, types: &TypeManager) -> RecordsResult<UnitDeclaration> {
    let fail = |progress: ParseProgress<'_>, what: &str| {
        RecordsError::user(format!("{what} at offset {}", progress.position()))
    };
    let start = ParseProgress::new(line);
    let progress = start
        .consume_keyword("UNIT")
        .ok_or_else(|| fail(start, "expected UNIT"))?;
    let name = progress
        .consume_ident()
        .ok_or_else(|| fail(progress, "expected a unit name"))?;
    let (name, progress) = (name.0.to_string(), name.1);
    let description = progress.consume_quoted().map_err(|e| RecordsError::user(e.to_string()))?;
    let progress = description
        .progress
        .consume_keyword("CATEGORY")
        .ok_or_else(|| fail(description.progress, "expected CATEGORY"))?;
    let category = progress.consume_quoted().map_err(|e| RecordsError::user(e.to_string()))?;

    let mut declaration = UnitDeclaration::base(&name, &description.value, &category.value);
    let mut progress = category.progress;
    if let Some(after) = progress.consume_keyword("PREFIX") {
        let prefix = after.consume_quoted().map_err(|e| RecordsError::user(e.to_string()))?;
        declaration.prefix = prefix.value;
        progress = prefix.progress;
    }
    if let Some(after) = progress.consume_keyword("SUFFIX") {
        let suffix = after.consume_quoted().map_err(|e| RecordsError::user(e.to_string()))?;
        declaration.suffix = suffix.value;
        progress = suffix.progress;
    }
    if let Some(after) = progress.consume_next("=") {
        let (scale, after) = after
            .consume_number()
            .ok_or_else(|| fail(after, "expected a scale factor"))?;
        let scale: Decimal = scale
            .parse()
            .map_err(|_| RecordsError::user(format!("invalid scale factor {scale}")))?;
        let unit = parse_unit_expression(after.rest().trim())
            .map_err(|e| RecordsError::user(e.message))?
            .to_unit(types.unit_manager())?;
        declaration.equivalent = Some((scale, unit));
    } else if !progress.skip_spaces().at_end() {
        return Err(fail(progress.skip_spaces(), "unexpected text"));
    }
    Ok(declaration)
}

pub fn save_unit_line(declaration: &UnitDeclaration) -> String {
    let mut line = format!(
        "UNIT {} {} CATEGORY {}",
        declaration.name,
        quote(&declaration.description),
        quote(&declaration.category)
    );
    if !declaration.prefix.is_empty() {
        line.push_str(&format!(" PREFIX {}", quote(&declaration.prefix)));
    }
    if !declaration.suffix.is_empty() {
        line.push_str(&format!(" SUFFIX {}", quote(&declaration.suffix)));
    }
    if let Some((scale, unit)) = &declaration.equivalent {
        let unit = save_unit_expression(&UnitExpression::from_unit(unit));
        line.push_str(&format!(" = {} {unit}", scale.normalize()));
    }
    line
}

type TypeDeclaration = (TypeId, Vec<(TypeVariableKind, String)>, Vec<TagType<TypeTerm>>);

/// `TYPE Name TAGGED [@typevar t | @unitvar u]... Tag [| Tag(inner)]...`
fn parse_type_line(line: &str, types: &TypeManager) -> RecordsResult<TypeDeclaration> {
    let start = ParseProgress::new(line);
    let expected = |what: &str, at: ParseProgress<'_>| {
        RecordsError::user(format!("expected {what} at offset {}", at.position()))
    };
    let progress = start
        .consume_keyword("TYPE")
        .ok_or_else(|| expected("TYPE", start))?;
    let name = progress
        .consume_name()
        .map_err(|e| RecordsError::user(e.to_string()))?;
    let name_id = TypeId::new(&name.value)
        .map_err(|err| RecordsError::user(format!("invalid type name {:?}: {err}", name.value)))?;
    let mut progress = name
        .progress
        .consume_keyword("TAGGED")
        .ok_or_else(|| expected("TAGGED", name.progress))?;

    let mut vars = Vec::new();
    loop {
        let (kind, after) = if let Some(after) = progress.consume_keyword("@typevar") {
            (TypeVariableKind::Type, after)
        } else if let Some(after) = progress.consume_keyword("@unitvar") {
            (TypeVariableKind::Unit, after)
        } else {
            break;
        };
        let (var, after) = after
            .consume_ident()
            .ok_or_else(|| expected("a variable name", after))?;
        vars.push((kind, var.to_string()));
        progress = after;
    }

    let mut tags = Vec::new();
    for part in split_top_level(progress.rest(), '|') {
        let tag = ParseProgress::new(part)
            .consume_name()
            .map_err(|e| RecordsError::user(e.to_string()))?;
        let rest = tag.progress.rest().trim();
        let inner = if rest.is_empty() {
            None
        } else {
            let inside = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| {
                    RecordsError::user(format!("unexpected text after tag {}: {rest}", tag.value))
                })?;
            let inner = parse_type_expression(inside.trim())
                .map_err(|e| RecordsError::user(e.message))?;
            Some(inner.to_type_term(types.unit_manager())?)
        };
        tags.push(TagType::new(tag.value, inner));
    }
    Ok((name_id, vars, tags))
}

/// Splits on `separator` where it is outside quotes and brackets.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' | '[' | '{' if !quoted => depth += 1,
            ')' | ']' | '}' if !quoted => depth = depth.saturating_sub(1),
            c if c == separator && !quoted && depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

pub fn save_type_line(
    name: &TypeId,
    vars: &[(TypeVariableKind, String)],
    tags: &[TagType<TypeTerm>],
) -> RecordsResult<String> {
    let mut line = format!("TYPE {} TAGGED", quoted_if_needed(name.raw()));
    for (kind, var) in vars {
        let keyword = match kind {
            TypeVariableKind::Type => "@typevar",
            TypeVariableKind::Unit => "@unitvar",
        };
        line.push_str(&format!(" {keyword} {var}"));
    }
    let tags = tags
        .iter()
        .map(|tag| {
            let name = quoted_if_needed(&tag.name);
            Ok(match &tag.inner {
                Some(inner) => {
                    let inner = save_type_expression(&TypeExpression::from_type_term(inner)?);
                    format!("{name}({inner})")
                }
                None => name,
            })
        })
        .collect::<RecordsResult<Vec<_>>>()?;
    line.push(' ');
    line.push_str(&tags.join(" | "));
    Ok(line)
}

/// Writes every user unit and user tagged type of `types` into `document`, replacing its
/// UNITS and TYPES blocks.
pub fn save_declarations(document: &mut Document, types: &TypeManager) -> RecordsResult<()> {
    let units = types
        .unit_manager()
        .user_declarations()
        .map(save_unit_line)
        .collect::<Vec<_>>();
    let tagged = types
        .user_definitions()
        .map(|def| save_type_line(&def.name, &def.type_vars, &def.tags))
        .collect::<RecordsResult<Vec<_>>>()?;
    document.set_block(Block::new(UNITS_BLOCK, units));
    document.set_block(Block::new(TYPES_BLOCK, tagged));
    Ok(())
}
