use crate::error::{corrupt, Error, Result};
use crate::model::MovieId;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
    TransactionalTree,
};
use std::collections::HashMap;
use std::convert::TryFrom;
use unic_ucd_category::GeneralCategory;

pub fn tokens_iter(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c| !is_token_character(c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

pub fn is_token_character(c: char) -> bool {
    let category = GeneralCategory::of(c);
    category.is_number() || category.is_letter() || category == GeneralCategory::PrivateUse
}

fn token_counts(value: &str) -> (HashMap<String, u32>, u32) {
    let mut counts: HashMap<String, u32> = HashMap::new();
    let mut total = 0u32;
    for token in tokens_iter(value) {
        *counts.entry(token).or_insert(0) += 1;
        total += 1;
    }
    (counts, total)
}

fn read_u32(data: &[u8]) -> Result<u32> {
    let bytes = <[u8; 4]>::try_from(data).map_err(|_| corrupt("expected 4 byte counter"))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(data: &[u8]) -> Result<u64> {
    let bytes = <[u8; 8]>::try_from(data).map_err(|_| corrupt("expected 8 byte id"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Token entry: number of documents containing the token, then the token id.
fn read_token(data: &[u8]) -> Result<(u32, [u8; 8])> {
    if data.len() != 12 {
        return Err(corrupt("token entry is not 12 bytes"));
    }
    let id = <[u8; 8]>::try_from(&data[4..12]).map_err(|_| corrupt("bad token id"))?;
    Ok((read_u32(&data[0..4])?, id))
}

fn token_entry(documents: u32, id: [u8; 8]) -> Vec<u8> {
    let mut entry = documents.to_le_bytes().to_vec();
    entry.extend_from_slice(&id);
    entry
}

// empty key in `tokens` and `doclen` holding the aggregate counters
const TOTAL: &[u8] = b"";

const FTS_FREQUENCY_POSTFIX: &[u8] = b"_frequency";
const FTS_TOKENS_POSTFIX: &[u8] = b"_tokens";
const FTS_DOCLEN_POSTIFX: &[u8] = b"_doclen";

// BM25 parameters
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Full-text index over short movie texts, ranked with BM25.
///
/// * `tokens`: token -> document count and token id. The empty token counts all documents.
/// * `frequency`: token id ++ movie id -> occurrences of the token in that movie.
/// * `doclen`: movie id -> number of tokens; the empty key holds the total.
pub struct FTSTree {
    frequency: sled::Tree,
    tokens: sled::Tree,
    doclen: sled::Tree,
}

pub trait FTSExt {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree>;
}

impl FTSExt for sled::Db {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree> {
        let open = |postfix: &[u8]| {
            let mut tree_name = name.as_ref().to_vec();
            tree_name.extend_from_slice(postfix);
            self.open_tree(tree_name)
        };
        Ok(FTSTree {
            frequency: open(FTS_FREQUENCY_POSTFIX)?,
            tokens: open(FTS_TOKENS_POSTFIX)?,
            doclen: open(FTS_DOCLEN_POSTIFX)?,
        })
    }
}

fn index(
    frequency: &TransactionalTree,
    tokens: &TransactionalTree,
    doclen: &TransactionalTree,
    key: &[u8; 8],
    counts: &HashMap<String, u32>,
    total_count: u32,
) -> ConflictableTransactionResult<(), Error> {
    let abort = ConflictableTransactionError::Abort;
    if doclen
        .insert(&key[..], &total_count.to_le_bytes()[..])?
        .is_some()
    {
        return Err(abort(corrupt("document indexed twice")));
    }
    let old_total_dl = match doclen.get(TOTAL)? {
        Some(dl) => read_u32(&dl).map_err(abort)?,
        None => 0,
    };
    doclen.insert(TOTAL, &(old_total_dl + total_count).to_le_bytes()[..])?;

    let documents = match tokens.get(TOTAL)? {
        Some(data) => read_u32(&data).map_err(abort)?,
        None => 0,
    };
    tokens.insert(TOTAL, &(documents + 1).to_le_bytes()[..])?;

    for (token, count) in counts.iter() {
        let (old_documents, id) = match tokens.get(token.as_bytes())? {
            Some(old) => read_token(&old).map_err(abort)?,
            None => (0, tokens.generate_id()?.to_be_bytes()),
        };
        let mut frequency_key = id.to_vec();
        frequency_key.extend_from_slice(key);
        frequency.insert(frequency_key, &count.to_le_bytes()[..])?;
        tokens.insert(token.as_bytes(), token_entry(old_documents + 1, id))?;
    }
    Ok(())
}

impl FTSTree {
    /// Stores `document` under `key` in `documents` and indexes `text` for it, all in one
    /// transaction. Each key may only be indexed once; on any failure nothing is written.
    pub fn insert(
        &self,
        documents: &sled::Tree,
        key: MovieId,
        document: &[u8],
        text: &str,
    ) -> Result<()> {
        let key = key.0.to_be_bytes();
        let (counts, total_count) = token_counts(text);

        (&self.frequency, &self.tokens, &self.doclen, documents)
            .transaction(|(frequency, tokens, doclen, documents)| {
                if documents.insert(&key[..], document)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(corrupt(
                        "document stored twice",
                    )));
                }
                index(frequency, tokens, doclen, &key, &counts, total_count)
            })
            .map_err(|e: TransactionError<Error>| match e {
                TransactionError::Storage(s) => s.into(),
                TransactionError::Abort(e) => e,
            })
    }

    /// Scores every document sharing a token with `value`, best first.
    pub fn query(&self, value: &str) -> Result<Vec<(MovieId, f32)>> {
        let (counts, _) = token_counts(value);

        let num_documents = match self.tokens.get(TOTAL)? {
            Some(data) => read_u32(&data)?,
            None => return Ok(Vec::new()),
        };
        let total_dl = match self.doclen.get(TOTAL)? {
            Some(dl) => read_u32(&dl)?,
            None => 0,
        };
        let avgdl = (total_dl as f32 / num_documents as f32).max(1.0);

        let mut scores: HashMap<MovieId, f32> = HashMap::new();
        for (token, count) in counts {
            let (documents, id) = match self.tokens.get(token.as_bytes())? {
                Some(data) => read_token(&data)?,
                None => continue,
            };
            let n = documents as f32;
            let idf = ((num_documents as f32 - n + 0.5) / (n + 0.5) + 1.0).ln();
            for entry in self.frequency.scan_prefix(id) {
                let (id_and_key, frequency) = entry?;
                let frequency = read_u32(&frequency)? as f32;
                let key = &id_and_key[8..];
                let dl = match self.doclen.get(key)? {
                    Some(dl) => read_u32(&dl)? as f32,
                    None => 0.0,
                };
                let bm25 =
                    idf * frequency * (K1 + 1.0) / (frequency + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(MovieId(read_u64(key)?)).or_insert(0.0) += bm25 * count as f32;
            }
        }

        let mut ranked: Vec<(MovieId, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }
}
