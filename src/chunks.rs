//! Splitting text fragments into provider-sized batches and reassembling the
//! translated batches into the original fragment order.
//!
//! Providers limit both how many texts one request may carry and how large
//! the request body may get. [`split`] packs fragments greedily into chunks
//! that respect those limits, subdividing any fragment that is too large to
//! fit into a chunk on its own. The returned [`ChunkPlan`] remembers where
//! every piece came from so [`ChunkPlan::reassemble`] can rebuild one
//! translated string per input fragment.

use regex::Regex;
use std::sync::OnceLock;

/// Size limits for a single chunk. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkBounds {
    /// Maximum number of fragments per chunk
    pub max_count: Option<usize>,
    /// Maximum cumulative encoded byte size per chunk (see [`encoded_byte_size`])
    pub max_byte_size: Option<usize>,
}

impl ChunkBounds {
    /// Bounds that put every fragment into a single chunk
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds limiting both the fragment count and the byte size
    pub fn new(max_count: usize, max_byte_size: usize) -> Self {
        Self {
            max_count: Some(max_count),
            max_byte_size: Some(max_byte_size),
        }
    }

    /// Set the maximum number of fragments per chunk
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Set the maximum encoded byte size per chunk
    pub fn with_max_byte_size(mut self, max_byte_size: usize) -> Self {
        self.max_byte_size = Some(max_byte_size);
        self
    }

    fn is_unbounded(&self) -> bool {
        self.max_count.is_none() && self.max_byte_size.is_none()
    }
}

/// Separator that glues a piece to the piece following it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Newline,
    Space,
    Nothing,
}

impl Join {
    pub fn as_str(self) -> &'static str {
        match self {
            Join::Newline => "\n",
            Join::Space => " ",
            Join::Nothing => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    /// Index of the input fragment this piece belongs to
    fragment: usize,
    /// First piece of its fragment
    start_new_text: bool,
    /// How this piece joins the next piece of the same fragment
    join: Join,
}

/// Chunks to send to a provider plus the bookkeeping needed to undo the split.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    chunks: Vec<Vec<String>>,
    pieces: Vec<Vec<Piece>>,
}

impl ChunkPlan {
    /// The batches to translate, in submission order
    pub fn chunks(&self) -> &[Vec<String>] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Rebuild one string per original fragment from one translated batch
    /// per chunk, given in chunk order.
    ///
    /// Continuation pieces are appended to the text of their fragment using
    /// the recorded separator. Missing batches, or batches shorter than the
    /// chunk they answer, drop the affected tail instead of failing. Once a
    /// piece is missing, the remaining pieces of that fragment are skipped
    /// so no fragment is stitched together with a gap.
    pub fn reassemble(&self, translated: Vec<Vec<String>>) -> Vec<String> {
        let mut output: Vec<String> = Vec::new();
        // Fragment currently being rebuilt and the separator to its next piece
        let mut open: Option<(usize, Join)> = None;

        for (batch, pieces) in translated.into_iter().zip(&self.pieces) {
            let mut texts = batch.into_iter();
            for piece in pieces {
                let Some(text) = texts.next() else {
                    open = None;
                    continue;
                };

                if piece.start_new_text {
                    output.push(text);
                    open = Some((piece.fragment, piece.join));
                    continue;
                }

                match (open, output.last_mut()) {
                    (Some((fragment, join)), Some(current)) if fragment == piece.fragment => {
                        current.push_str(join.as_str());
                        current.push_str(&text);
                        open = Some((fragment, piece.join));
                    }
                    _ => open = None,
                }
            }
        }

        output
    }
}

/// Length of `text` once percent-encoded as UTF-8, the way providers receive
/// form and query payloads. Unreserved ASCII counts one byte, every other
/// UTF-8 byte counts three.
pub fn encoded_byte_size(text: &str) -> usize {
    text.chars()
        .map(|c| {
            if is_unreserved(c) {
                1
            } else {
                3 * c.len_utf8()
            }
        })
        .sum()
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')')
}

/// Split `fragments` into chunks that respect `bounds`.
///
/// Without bounds the plan holds a single chunk with every fragment. With
/// bounds, fragments are packed greedily in order; a fragment larger than
/// `max_byte_size` is first cut on newlines, then on sentence ends, then at
/// the whitespace nearest its middle, recursively, until every piece fits or
/// cannot be cut further.
pub fn split(fragments: &[String], bounds: ChunkBounds) -> ChunkPlan {
    if bounds.is_unbounded() {
        let pieces = (0..fragments.len())
            .map(|fragment| Piece {
                fragment,
                start_new_text: true,
                join: Join::Nothing,
            })
            .collect();
        return ChunkPlan {
            chunks: vec![fragments.to_vec()],
            pieces: vec![pieces],
        };
    }

    let max_count = bounds.max_count.map(|max| max.max(1));
    let max_byte_size = bounds.max_byte_size;

    let mut plan = ChunkPlan::default();
    let mut current: Vec<String> = Vec::new();
    let mut current_pieces: Vec<Piece> = Vec::new();
    let mut current_size = 0usize;

    for (index, fragment) in fragments.iter().enumerate() {
        let mut parts = Vec::new();
        match max_byte_size {
            Some(max) if encoded_byte_size(fragment) > max => {
                subdivide(fragment, max, Join::Nothing, &mut parts)
            }
            _ => parts.push((fragment.as_str(), Join::Nothing)),
        }

        for (position, (text, join)) in parts.into_iter().enumerate() {
            let size = encoded_byte_size(text);
            let over_count = max_count.is_some_and(|max| current.len() + 1 > max);
            let over_size = max_byte_size.is_some_and(|max| current_size + size > max);

            if !current.is_empty() && (over_count || over_size) {
                plan.chunks.push(std::mem::take(&mut current));
                plan.pieces.push(std::mem::take(&mut current_pieces));
                current_size = 0;
            }

            current_size += size;
            current.push(text.to_string());
            current_pieces.push(Piece {
                fragment: index,
                start_new_text: position == 0,
                join,
            });
        }
    }

    if !current.is_empty() {
        plan.chunks.push(current);
        plan.pieces.push(current_pieces);
    }

    plan
}

/// Cut `text` until every piece fits `max_byte_size`. The last piece takes
/// `trailing` as its separator so nested cuts keep the outer separator.
fn subdivide<'a>(
    text: &'a str,
    max_byte_size: usize,
    trailing: Join,
    out: &mut Vec<(&'a str, Join)>,
) {
    if encoded_byte_size(text) <= max_byte_size {
        out.push((text, trailing));
        return;
    }

    let Some((parts, join)) = cut(text) else {
        // A single word larger than the limit; it goes out as-is.
        out.push((text, trailing));
        return;
    };

    let last = parts.len() - 1;
    for (position, part) in parts.into_iter().enumerate() {
        let separator = if position == last { trailing } else { join };
        subdivide(part, max_byte_size, separator, out);
    }
}

fn cut(text: &str) -> Option<(Vec<&str>, Join)> {
    if text.contains('\n') {
        return Some((text.split('\n').collect(), Join::Newline));
    }

    let sentences = split_sentences(text);
    if sentences.len() > 1 {
        return Some((sentences, Join::Space));
    }

    split_near_middle(text)
}

fn sentence_end() -> &'static Regex {
    static SENTENCE_END: OnceLock<Regex> = OnceLock::new();
    SENTENCE_END.get_or_init(|| Regex::new(r"[.?!] ").expect("valid sentence regex"))
}

/// Split after `.`, `?` or `!` followed by a space. The punctuation stays
/// with its sentence, the space becomes the separator.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for found in sentence_end().find_iter(text) {
        sentences.push(&text[start..found.start() + 1]);
        start = found.end();
    }
    sentences.push(&text[start..]);
    sentences
}

/// Split once at the whitespace closest to the middle of `text`.
///
/// A plain space is dropped and restored as the separator; any other
/// whitespace stays at the end of the left half.
fn split_near_middle(text: &str) -> Option<(Vec<&str>, Join)> {
    let middle = text.len() / 2;
    let (index, ch) = text
        .char_indices()
        .filter(|&(index, ch)| {
            ch.is_whitespace() && (ch == ' ' || index + ch.len_utf8() < text.len())
        })
        .min_by_key(|&(index, _)| index.abs_diff(middle))?;

    if ch == ' ' {
        Some((vec![&text[..index], &text[index + 1..]], Join::Space))
    } else {
        let end = index + ch.len_utf8();
        Some((vec![&text[..end], &text[end..]], Join::Nothing))
    }
}
