use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a token in a [`Tokenizer`] vocabulary.
pub type TokenId = u32;

/// Unknown word.
pub const UNK: TokenId = 0;
/// Start of a proverb.
pub const BOS: TokenId = 1;
/// End of a proverb.
pub const EOS: TokenId = 2;

const SPECIAL_TOKENS: [&str; 3] = ["<unk>", "<s>", "</s>"];

/// Characters never preceded by a space when decoding.
const CLOSING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '…', '»'];
/// Characters never followed by a space when decoding.
const OPENING: &[char] = &['(', '[', '{', '«', '„'];

/// Word-level tokenizer with a vocabulary learned from a corpus.
///
/// A token is either a word (alphanumeric run, inner apostrophes and dashes kept)
/// or a single punctuation character. Proverbs are framed by `<s>` / `</s>`.
///
/// # Invariants
/// - `tokens[id]` is the text of `id`, and `ids[text] == id`
/// - Ids `0..3` are the special tokens
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Tokenizer {
	ids: HashMap<String, TokenId>,
	tokens: Vec<String>,
}

impl Default for Tokenizer {
	fn default() -> Self {
		Self::new()
	}
}

impl Tokenizer {
	/// Creates a tokenizer knowing only the special tokens.
	pub fn new() -> Self {
		let mut tokenizer = Self { ids: HashMap::new(), tokens: Vec::new() };
		for special in SPECIAL_TOKENS {
			tokenizer.intern(special);
		}
		tokenizer
	}

	/// Number of known tokens, special tokens included.
	pub fn vocab_size(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_special(id: TokenId) -> bool {
		(id as usize) < SPECIAL_TOKENS.len()
	}

	fn intern(&mut self, piece: &str) -> TokenId {
		if let Some(id) = self.ids.get(piece) {
			return *id;
		}
		let id = self.tokens.len() as TokenId;
		self.tokens.push(piece.to_owned());
		self.ids.insert(piece.to_owned(), id);
		id
	}

	/// Adds every piece of `text` to the vocabulary.
	pub fn learn(&mut self, text: &str) {
		for piece in pieces(text) {
			self.intern(piece);
		}
	}

	/// Encodes text without framing tokens; unknown pieces become `<unk>`.
	pub fn encode(&self, text: &str) -> Vec<TokenId> {
		pieces(text)
			.into_iter()
			.map(|piece| self.ids.get(piece).copied().unwrap_or(UNK))
			.collect()
	}

	/// Encodes one proverb framed as `<s> ... </s>`.
	pub fn encode_sentence(&self, sentence: &str) -> Vec<TokenId> {
		let mut ids = Vec::with_capacity(sentence.len() / 4 + 2);
		ids.push(BOS);
		ids.extend(self.encode(sentence));
		ids.push(EOS);
		ids
	}

	pub fn token(&self, id: TokenId) -> Option<&str> {
		self.tokens.get(id as usize).map(String::as_str)
	}

	/// Decodes ids back into text.
	///
	/// With `skip_special_tokens`, `<s>`/`<unk>` vanish and `</s>` becomes a line break
	/// between proverbs.
	pub fn decode(&self, ids: &[TokenId], skip_special_tokens: bool) -> String {
		let mut lines: Vec<String> = Vec::new();
		let mut line = String::new();
		let mut glue = true;

		for &id in ids {
			if skip_special_tokens && Self::is_special(id) {
				if id == EOS && !line.is_empty() {
					lines.push(std::mem::take(&mut line));
					glue = true;
				}
				continue;
			}
			let Some(piece) = self.token(id) else { continue };
			let closing = piece.chars().count() == 1 && piece.starts_with(CLOSING);
			if !line.is_empty() && !glue && !closing {
				line.push(' ');
			}
			line.push_str(piece);
			glue = piece.chars().count() == 1 && piece.starts_with(OPENING);
		}
		if !line.is_empty() {
			lines.push(line);
		}
		lines.join("\n")
	}
}

/// Splits text into word and punctuation pieces.
///
/// `"(kto pyta, nie błądzi!)"` → `["(", "kto", "pyta", ",", "nie", "błądzi", "!", ")"]`
fn pieces(text: &str) -> Vec<&str> {
	let mut out = Vec::new();
	for chunk in text.split_whitespace() {
		let start = chunk.find(char::is_alphanumeric);
		let end = chunk
			.char_indices()
			.rev()
			.find(|(_, c)| c.is_alphanumeric())
			.map(|(i, c)| i + c.len_utf8());

		match (start, end) {
			(Some(start), Some(end)) => {
				out.extend(single_chars(&chunk[..start]));
				out.push(&chunk[start..end]);
				out.extend(single_chars(&chunk[end..]));
			}
			_ => out.extend(single_chars(chunk)),
		}
	}
	out
}

fn single_chars(s: &str) -> impl Iterator<Item = &str> {
	s.char_indices().map(move |(i, c)| &s[i..i + c.len_utf8()])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_punctuation_from_words() {
		assert_eq!(
			pieces("(kto pyta, nie błądzi!)"),
			vec!["(", "kto", "pyta", ",", "nie", "błądzi", "!", ")"]
		);
		assert_eq!(pieces("don't -- stop"), vec!["don't", "-", "-", "stop"]);
	}

	#[test]
	fn unknown_words_map_to_unk() {
		let mut tokenizer = Tokenizer::new();
		tokenizer.learn("a stitch in time");
		let ids = tokenizer.encode("a stitch in space");
		assert_eq!(ids.len(), 4);
		assert_eq!(ids[3], UNK);
		assert_eq!(tokenizer.vocab_size(), 3 + 4);
	}

	#[test]
	fn decode_reattaches_punctuation_and_splits_proverbs() {
		let mut tokenizer = Tokenizer::new();
		tokenizer.learn("kto pyta, nie błądzi. (tak)");
		let mut ids = tokenizer.encode_sentence("kto pyta, nie błądzi.");
		ids.extend(tokenizer.encode_sentence("(tak)"));
		assert_eq!(tokenizer.decode(&ids, true), "kto pyta, nie błądzi.\n(tak)");
	}

	#[test]
	fn decode_can_keep_special_tokens() {
		let tokenizer = Tokenizer::new();
		assert_eq!(tokenizer.decode(&[BOS, EOS], false), "<s> </s>");
	}
}
