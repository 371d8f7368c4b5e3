//! Textual block revisions and their resolution.

use meridian_chain::{ChainResult, Repository};
use meridian_primitives::{BlockId, BlockSummary, Header, BLOCK_INTERVAL};

/// A parsed revision token locating a block summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// The current best block; also what an absent token means.
    Best,
    /// The finalizer's highest irreversible block.
    Finalized,
    /// A synthetic summary one block past best, for call simulation only.
    Next,
    /// A canonical height.
    Number(u32),
    /// A block identifier, possibly on a non-canonical fork.
    Id(BlockId),
}

/// A malformed revision token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BadRevision(String);

impl Revision {
    /// Parses a revision token. `allow_next` admits the `next` revision,
    /// which is only valid where a persisted block is not required.
    ///
    /// Decimal tokens not representable as a block number fail here, before
    /// any storage is consulted.
    pub fn parse(token: Option<&str>, allow_next: bool) -> Result<Self, BadRevision> {
        let token = match token {
            None | Some("") | Some("best") => return Ok(Self::Best),
            Some("finalized") => return Ok(Self::Finalized),
            Some("next") => {
                return if allow_next {
                    Ok(Self::Next)
                } else {
                    Err(BadRevision("next is not supported here".into()))
                }
            }
            Some(token) => token,
        };

        if let Some(hex) = token.strip_prefix("0x") {
            if hex.len() != 64 {
                return Err(BadRevision("invalid length".into()))
            }
            return token
                .parse()
                .map(Self::Id)
                .map_err(|_| BadRevision("invalid hex id".into()))
        }

        token
            .parse::<u32>()
            .map(Self::Number)
            .map_err(|_| BadRevision("invalid block number".into()))
    }
}

/// Resolves a revision to a block summary against the repository and its
/// finalizer.
///
/// `Next` yields a synthetic summary on top of best: parent is best, the
/// timestamp advances by one interval, the gas limit and state root carry
/// over. It is never stored.
pub fn resolve_summary(repo: &Repository, revision: Revision) -> ChainResult<BlockSummary> {
    match revision {
        Revision::Best => Ok((*repo.best_block_summary()).clone()),
        Revision::Finalized => {
            Ok((*repo.block_summary(repo.finalizer().finalized())?).clone())
        }
        Revision::Number(number) => {
            let id = repo.best_chain().block_id(number)?;
            Ok((*repo.block_summary(id)?).clone())
        }
        Revision::Id(id) => Ok((*repo.block_summary(id)?).clone()),
        Revision::Next => {
            let best = repo.best_block_summary();
            let header = Header {
                parent_id: best.id(),
                timestamp: best.header.timestamp + BLOCK_INTERVAL,
                gas_limit: best.header.gas_limit,
                gas_used: 0,
                total_score: best.header.total_score + 1,
                beneficiary: best.header.beneficiary,
                state_root: best.header.state_root,
                features: best.header.features,
                ..Default::default()
            };
            Ok(BlockSummary { header: header.seal(), txs: Vec::new(), size: 0, conflicts: 0 })
        }
    }
}
