//! Coin selection: which unspent outputs fund a payment.
//!
//! The selector prefers an exact-value output, then tries to get close
//! to the target from above with a stochastic subset-sum over the
//! sub-target candidates, and falls back to the smallest single output
//! that covers the target. Ties go to the single output. Solutions
//! avoid sub-cent change; that bias, and the shuffle-driven
//! unpredictability of the subset, are deliberate fee and privacy
//! behavior.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::constants::CENT;
use crate::transaction::TxHash;
use crate::wallet::Wallet;
use crate::Amount;

/// An output picked by the selector, with the context the builder
/// needs afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedCoin {
    pub hash: TxHash,
    pub index: u32,
    pub value: Amount,
    pub depth: i32,
}

impl Wallet {
    /// Select unspent outputs totalling at least `target`, admitting
    /// only coins whose depth passes `conf_mine` (our own) or
    /// `conf_theirs` (received). Returns the picked coins and their sum,
    /// or `None` when the spendable set cannot reach the target.
    ///
    /// The RNG drives both the candidate shuffle and the subset trials;
    /// pass a seeded one to reproduce outcomes.
    pub fn select_coins_min_conf(
        &self,
        target: Amount,
        conf_mine: i32,
        conf_theirs: i32,
        rng: &mut impl Rng,
    ) -> Option<(Vec<SelectedCoin>, Amount)> {
        // the single cheapest output that covers target on its own
        let mut lowest_larger: Option<SelectedCoin> = None;
        // candidates below target + CENT, examined by the subset pass
        let mut smalls: Vec<SelectedCoin> = Vec::new();
        let mut total_lower: Amount = 0;

        let mut coins: Vec<&crate::wallet::tx::WalletTx> = self.tx_index.values().collect();
        coins.shuffle(rng);

        for wtx in coins {
            if !self.chain.is_final(&wtx.tx) || !self.is_confirmed(wtx) {
                continue;
            }
            if wtx.is_coinbase() && self.chain.blocks_to_maturity(&wtx.tx) > 0 {
                continue;
            }
            let hash = wtx.hash();
            let depth = self.chain.depth(&hash);
            let required = if self.is_from_me(&wtx.tx) {
                conf_mine
            } else {
                conf_theirs
            };
            if depth < required {
                continue;
            }

            for (index, output) in wtx.tx.outputs.iter().enumerate() {
                if wtx.is_spent(index) || !self.is_mine_output(output) {
                    continue;
                }
                let value = output.value;
                if value <= 0 {
                    continue;
                }
                let coin = SelectedCoin {
                    hash,
                    index: index as u32,
                    value,
                    depth,
                };
                if value == target {
                    return Some((vec![coin], value));
                } else if value < target + CENT {
                    total_lower += value;
                    smalls.push(coin);
                } else if lowest_larger.as_ref().map_or(true, |c| value < c.value) {
                    lowest_larger = Some(coin);
                }
            }
        }

        if total_lower == target || total_lower == target + CENT {
            return Some((smalls, total_lower));
        }

        if total_lower < target + if lowest_larger.is_some() { CENT } else { 0 } {
            // everything below the line together cannot do it
            let single = lowest_larger?;
            let value = single.value;
            return Some((vec![single], value));
        }

        // plenty of small coins: aim a cent above target so change is
        // never dust
        let mut target = target;
        if total_lower >= target + CENT {
            target += CENT;
        }

        // Solve subset sum by stochastic approximation: two passes per
        // trial, the first tossing coins in at random, the second
        // flipping the leftovers, keeping the smallest total that
        // reaches the target.
        smalls.sort_by(|a, b| b.value.cmp(&a.value));
        let mut best_mask = vec![true; smalls.len()];
        let mut best_total = total_lower;
        let mut included = vec![false; smalls.len()];

        for _ in 0..1000 {
            if best_total == target {
                break;
            }
            included.fill(false);
            let mut total: Amount = 0;
            let mut reached = false;
            for pass in 0..2 {
                if reached {
                    break;
                }
                for i in 0..smalls.len() {
                    if if pass == 0 { rng.random::<bool>() } else { !included[i] } {
                        total += smalls[i].value;
                        included[i] = true;
                        if total >= target {
                            reached = true;
                            if total < best_total {
                                best_total = total;
                                best_mask.copy_from_slice(&included);
                            }
                            total -= smalls[i].value;
                            included[i] = false;
                        }
                    }
                }
            }
        }

        // a single larger output that lands at least as close wins
        if let Some(single) = lowest_larger {
            if single.value - target <= best_total - target {
                let value = single.value;
                return Some((vec![single], value));
            }
        }

        let picked: Vec<SelectedCoin> = smalls
            .into_iter()
            .zip(best_mask)
            .filter_map(|(coin, keep)| keep.then_some(coin))
            .collect();
        tracing::debug!(total = best_total, coins = picked.len(), "coin selection best subset");
        Some((picked, best_total))
    }

    /// Selection with descending confirmation requirements: settled
    /// coins first, then anything confirmed, then our own zero-depth
    /// change.
    pub fn select_coins(
        &self,
        target: Amount,
        rng: &mut impl Rng,
    ) -> Option<(Vec<SelectedCoin>, Amount)> {
        self.select_coins_min_conf(target, 1, 6, rng)
            .or_else(|| self.select_coins_min_conf(target, 1, 1, rng))
            .or_else(|| self.select_coins_min_conf(target, 0, 1, rng))
    }
}
