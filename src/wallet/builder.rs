//! Building, committing and rebroadcasting payments.
//!
//! Transaction creation loops until the fee settles: pick coins for
//! value plus the running fee, place change, sign, measure, and go
//! around again whenever the size demands more fee than was budgeted.
//! The loop is bounded; a budget that keeps moving is an error, not a
//! hang.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::collections::BTreeSet;

use crate::constants::{CENT, MAX_BLOCK_SIZE_GEN, MAX_FEE_ITERATIONS, MIN_TX_FEE};
use crate::crypto::keys::Address;
use crate::error::WalletError;
use crate::transaction::{
    allow_free, sign_input, Coin, Destination, Script, Transaction, TxHash, TxIn, TxOut,
};
use crate::unix_time;
use crate::wallet::keypool::ReservedKey;
use crate::wallet::tx::WalletTx;
use crate::wallet::Wallet;
use crate::Amount;

impl Wallet {
    /// Assemble and sign a transaction paying `payees`, funding it from
    /// the wallet's coins. `reserved` supplies the change key and must
    /// be kept or returned by the caller depending on what happens to
    /// the transaction. Returns the signed transaction and the fee it
    /// pays.
    pub fn create_transaction(
        &mut self,
        payees: &[(Script, Amount)],
        reserved: &mut ReservedKey,
    ) -> Result<(WalletTx, Amount), WalletError> {
        let mut value: Amount = 0;
        for (_, amount) in payees {
            if *amount < 0 {
                return Err(WalletError::InvalidAmount);
            }
            value += amount;
        }
        if payees.is_empty() || value < 0 {
            return Err(WalletError::InvalidAmount);
        }

        let mut rng = StdRng::from_rng(&mut self.rng);
        let mut fee: Amount = self.config.pay_tx_fee;

        for _ in 0..MAX_FEE_ITERATIONS {
            let mut wtx = WalletTx::new(Transaction::default());
            wtx.from_me = true;

            let total = value + fee;
            for (script, amount) in payees {
                wtx.tx.outputs.push(TxOut::new(*amount, script.clone()));
            }

            let Some((coins, value_in)) = self.select_coins(total, &mut rng) else {
                return Err(WalletError::InsufficientFunds {
                    available: self.balance(true),
                    needed: total,
                });
            };
            let mut priority: f64 = coins
                .iter()
                .map(|c| c.value as f64 * c.depth as f64)
                .sum();

            let mut change = value_in - value - fee;
            // sub-cent change cannot pay its own way; push it into the
            // fee until the minimum fee is met or the change is gone
            if fee < MIN_TX_FEE && change > 0 && change < CENT {
                let move_to_fee = change.min(MIN_TX_FEE - fee);
                change -= move_to_fee;
                fee += move_to_fee;
            }

            if change > 0 {
                // a fresh key so the change side is not obvious; the
                // price is that change is lost on a backup restored
                // from before this key existed
                let public = reserved.fetch(self)?;
                let change_script = match payees[0].0.destination() {
                    Some(Destination::KeyHash(_)) => {
                        Script::pay_to_address(&public.address(self.network_id()))
                    }
                    _ => Script::pay_to_pubkey(&public),
                };
                let position = rng.random_range(0..wtx.tx.outputs.len());
                wtx.tx
                    .outputs
                    .insert(position, TxOut::new(change, change_script));
            } else {
                reserved.return_key(self);
            }

            for coin in &coins {
                wtx.tx
                    .inputs
                    .push(TxIn::new(Coin::new(coin.hash, coin.index)));
            }
            wtx.spent = vec![false; wtx.tx.outputs.len()];

            for (n, coin) in coins.iter().enumerate() {
                let prev_script = self
                    .tx_index
                    .get(&coin.hash)
                    .and_then(|prev| prev.tx.outputs.get(coin.index as usize))
                    .map(|output| output.script_pubkey.clone())
                    .ok_or(WalletError::SigningFailed { input: n })?;
                sign_input(&self.keystore, &prev_script, &mut wtx.tx, n)?;
            }

            let bytes = wtx.tx.serialized_size();
            if bytes >= MAX_BLOCK_SIZE_GEN / 5 {
                return Err(WalletError::TxTooLarge);
            }
            priority /= bytes as f64;

            let pay_fee = self.config.pay_tx_fee * (1 + bytes as Amount / 1000);
            let min_fee = wtx.tx.min_fee(1, allow_free(priority));
            let required = pay_fee.max(min_fee);
            if fee < required {
                fee = required;
                continue;
            }

            self.add_supporting_transactions(&mut wtx);
            return Ok((wtx, fee));
        }

        reserved.return_key(self);
        Err(WalletError::NotConverged)
    }

    /// Make a created transaction real: consume the change key, record
    /// the transaction, mark the coins it spends, and hand it to the
    /// chain for relay. The wallet state is durable before the chain
    /// sees the transaction; a rejection leaves it in the wallet for
    /// later rebroadcast.
    pub fn commit_transaction(
        &mut self,
        wtx: WalletTx,
        reserved: &mut ReservedKey,
    ) -> Result<WalletTx, WalletError> {
        let hash = wtx.hash();
        tracing::info!(tx = %hash, "CommitTransaction");

        reserved.keep(self)?;

        // ours even without change: the history entry matters
        self.add_to_wallet(wtx.clone())?;

        for input in &wtx.tx.inputs {
            let prev_hash = input.prev_out.hash;
            let n = input.prev_out.index as usize;
            let snapshot = match self.tx_index.get_mut(&prev_hash) {
                Some(prev) => {
                    prev.mark_spent(n);
                    prev.clone()
                }
                None => continue,
            };
            self.write_to_disk(&snapshot)?;
        }

        if !self.chain.accept_transaction(&wtx.tx) {
            tracing::error!(tx = %hash, "transaction not valid, kept for rebroadcast");
            return Err(WalletError::Rejected);
        }
        Ok(self
            .tx_index
            .get(&hash)
            .cloned()
            .unwrap_or(wtx))
    }

    /// One-call payment to an arbitrary script. The returned error is
    /// the user-facing outcome; everything below reports typed kinds.
    pub fn send_money(
        &mut self,
        script_pubkey: Script,
        value: Amount,
    ) -> Result<WalletTx, WalletError> {
        if self.is_locked() {
            tracing::warn!("SendMoney on a locked wallet");
            return Err(WalletError::Locked);
        }
        let mut reserved = ReservedKey::new();
        match self.create_transaction(&[(script_pubkey, value)], &mut reserved) {
            Ok((wtx, fee)) => {
                if fee > self.config.fee_ceiling {
                    reserved.return_key(self);
                    return Err(WalletError::FeeTooLarge { required: fee });
                }
                self.commit_transaction(wtx, &mut reserved)
            }
            Err(error) => {
                reserved.return_key(self);
                Err(error)
            }
        }
    }

    /// Payment to an address.
    pub fn send_to_address(
        &mut self,
        address: &Address,
        value: Amount,
    ) -> Result<WalletTx, WalletError> {
        if value <= 0 {
            return Err(WalletError::InvalidAmount);
        }
        let available = self.balance(true);
        if value + self.config.pay_tx_fee > available {
            return Err(WalletError::InsufficientFunds {
                available,
                needed: value + self.config.pay_tx_fee,
            });
        }
        self.send_money(Script::pay_to_address(address), value)
    }

    /// Collect our own transactions that deserve rebroadcast.
    ///
    /// Deliberately lazy: nothing happens until a random half-hour
    /// after the previous attempt, and only once a new block has
    /// arrived since, so rebroadcast timing cannot fingerprint which
    /// transactions are ours. Transactions still unconfirmed five
    /// minutes after the best block's arrival make the list, oldest
    /// first.
    pub fn resend_wallet_transactions(&mut self, hashes: &mut BTreeSet<TxHash>) {
        let now = unix_time();
        if now < self.next_resend {
            return;
        }
        let first_call = self.next_resend == 0;
        let mut rng = StdRng::from_rng(&mut self.rng);
        self.next_resend = now + rng.random_range(0..30 * 60);
        if first_call {
            return;
        }

        if self.chain.best_received_time() < self.last_resend {
            return;
        }
        self.last_resend = now;

        tracing::info!("ResendWalletTransactions");
        let best_received = self.chain.best_received_time();
        let mut aged: Vec<(i64, TxHash)> = self
            .tx_index
            .values()
            .filter(|wtx| {
                wtx.from_me
                    && !wtx.is_coinbase()
                    && self.chain.depth(&wtx.hash()) < 1
                    && best_received - wtx.time_received > 5 * 60
            })
            .map(|wtx| (wtx.time_received, wtx.hash()))
            .collect();
        aged.sort();
        for (_, hash) in aged {
            hashes.insert(hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::WalletConfig;
    use crate::constants::COIN;
    use crate::wallet::db::WalletDb;
    use crate::wallet::testchain::TestChain;

    fn funded_wallet(values: &[Amount], depth: i32) -> (Wallet, Arc<TestChain>, Vec<TxHash>) {
        let chain = Arc::new(TestChain::default());
        let mut config = WalletConfig::default();
        config.keypool_size = 3;
        let mut wallet = Wallet::new(
            WalletDb::open_temporary().unwrap(),
            chain.clone(),
            config,
        );
        wallet.load_wallet().unwrap();
        wallet.set_rng_seed(7);

        let mut hashes = Vec::new();
        for (i, &value) in values.iter().enumerate() {
            let public = wallet.generate_new_key().unwrap();
            let funding = Transaction {
                inputs: vec![TxIn::new(Coin::new(TxHash([0xF0 + i as u8; 32]), 0))],
                outputs: vec![TxOut::new(
                    value,
                    Script::pay_to_address(&public.address(0)),
                )],
                ..Default::default()
            };
            chain.set_depth(funding.hash(), depth);
            wallet
                .add_to_wallet_if_involving_me(&funding, None, true)
                .unwrap();
            hashes.push(funding.hash());
        }
        (wallet, chain, hashes)
    }

    fn payee_script() -> Script {
        Script::pay_to_address(&Address::new(0, [0x99; 20]))
    }

    #[test]
    fn create_and_commit_spends_coins_once() {
        let (mut wallet, chain, _) = funded_wallet(&[50 * COIN, 40 * COIN], 10);
        let before = wallet.balance(false);

        let sent = wallet.send_money(payee_script(), 30 * COIN).unwrap();
        assert!(sent.from_me);
        assert_eq!(chain.accepted_hashes(), vec![sent.hash()]);

        // inputs must be marked spent in the funding transactions
        for input in &sent.tx.inputs {
            let prev = wallet.get_transaction(&input.prev_out.hash).unwrap();
            assert!(prev.is_spent(input.prev_out.index as usize));
        }

        // old coins large and deep: the send rides free, so only the
        // paid amount leaves the wallet
        assert_eq!(wallet.balance(false), before - 30 * COIN);
    }

    #[test]
    fn no_coin_funds_two_transactions() {
        let (mut wallet, _, _) = funded_wallet(&[50 * COIN, 40 * COIN, 30 * COIN], 10);

        let a = wallet.send_money(payee_script(), 20 * COIN).unwrap();
        let b = wallet.send_money(payee_script(), 20 * COIN).unwrap();

        let spent_by_a: Vec<Coin> = a.tx.inputs.iter().map(|i| i.prev_out).collect();
        for input in &b.tx.inputs {
            assert!(
                !spent_by_a.contains(&input.prev_out),
                "coin {:?} funded two committed transactions",
                input.prev_out
            );
        }
    }

    #[test]
    fn change_output_pays_back_to_wallet() {
        let (mut wallet, _, _) = funded_wallet(&[50 * COIN], 10);
        let sent = wallet.send_money(payee_script(), 10 * COIN).unwrap();
        assert_eq!(sent.tx.outputs.len(), 2);
        let change_credit = wallet.available_credit(&sent);
        assert_eq!(change_credit, 40 * COIN);
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let (mut wallet, _, _) = funded_wallet(&[2 * COIN], 10);
        match wallet.send_money(payee_script(), 5 * COIN) {
            Err(WalletError::InsufficientFunds { needed, .. }) => {
                assert!(needed >= 5 * COIN);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn small_young_coins_pay_the_minimum_fee() {
        // low value and shallow depth leave priority below the free
        // threshold, so the fee loop must settle on MIN_TX_FEE
        let (mut wallet, _, _) = funded_wallet(&[10 * CENT], 6);
        let mut reserved = ReservedKey::new();
        let (_, fee) = wallet
            .create_transaction(&[(payee_script(), 2 * CENT)], &mut reserved)
            .unwrap();
        reserved.return_key(&mut wallet);
        assert_eq!(fee, MIN_TX_FEE);
    }

    #[test]
    fn fee_ceiling_rejects_expensive_sends() {
        let (mut wallet, chain, _) = funded_wallet(&[10 * CENT], 6);
        wallet.config.fee_ceiling = MIN_TX_FEE - 1;
        match wallet.send_money(payee_script(), 2 * CENT) {
            Err(WalletError::FeeTooLarge { required }) => assert_eq!(required, MIN_TX_FEE),
            other => panic!("expected FeeTooLarge, got {other:?}"),
        }
        assert!(chain.accepted_hashes().is_empty());
    }

    #[test]
    fn locked_wallet_cannot_send() {
        let (mut wallet, _, _) = funded_wallet(&[50 * COIN], 10);
        wallet.encrypt_wallet("pw").unwrap();
        assert!(matches!(
            wallet.send_money(payee_script(), COIN),
            Err(WalletError::Locked)
        ));
        wallet.unlock("pw").unwrap();
        wallet.send_money(payee_script(), COIN).unwrap();
    }

    #[test]
    fn rejected_transaction_stays_in_wallet() {
        let (mut wallet, chain, _) = funded_wallet(&[50 * COIN], 10);
        *chain.reject.lock().unwrap() = true;
        let err = wallet.send_money(payee_script(), COIN);
        assert!(matches!(err, Err(WalletError::Rejected)));
        // signed and recorded; a later rebroadcast may still propagate
        assert_eq!(
            wallet.transactions().filter(|w| w.from_me).count(),
            1
        );
    }

    #[test]
    fn aborted_create_returns_the_reserved_key() {
        let (mut wallet, _, _) = funded_wallet(&[50 * COIN], 10);
        wallet.top_up_key_pool().unwrap();
        let pool_before = wallet.key_pool_size();

        let mut reserved = ReservedKey::new();
        let (_wtx, _fee) = wallet
            .create_transaction(&[(payee_script(), COIN)], &mut reserved)
            .unwrap();
        assert_eq!(wallet.key_pool_size(), pool_before - 1);

        // caller abandons the send
        reserved.return_key(&mut wallet);
        assert_eq!(wallet.key_pool_size(), pool_before);
    }

    #[test]
    fn resend_is_rate_limited_and_collects_aged_own_txs() {
        let (mut wallet, chain, _) = funded_wallet(&[50 * COIN], 10);
        let sent = wallet.send_money(payee_script(), COIN).unwrap();

        *chain.best_received.lock().unwrap() = unix_time() + 3600;

        let mut hashes = BTreeSet::new();
        wallet.resend_wallet_transactions(&mut hashes);
        assert!(hashes.is_empty(), "first call only primes the timer");

        // force the timer to have elapsed
        wallet.next_resend = 1;
        wallet.resend_wallet_transactions(&mut hashes);
        assert!(hashes.contains(&sent.hash()));

        // while the random delay is pending, nothing is collected
        wallet.next_resend = unix_time() + 1000;
        let mut again = BTreeSet::new();
        wallet.resend_wallet_transactions(&mut again);
        assert!(again.is_empty());
    }
}
