//! Two-level authenticated state tree.
//!
//! ## Structure
//!
//! The top-level tree maps account ids to account leaves; every account
//! leaf embeds the root of its own token sub-tree mapping token ids to
//! balances. Mutating a balance rewrites the token leaf, recomputes the
//! sub-tree root, rebinds it into the account leaf, and recomputes the
//! account root, so the single top root commits to every balance in the
//! system.
//!
//! ## Frozen commitments
//!
//! Open-order commitments are tracked in a marker column next to the
//! token leaves, outside the tree. The tree root commits to total
//! balances only; availability (`balance - frozen`) is a kernel-side
//! spendability check, re-derivable from the open order set.
//!
//! ## Transactions
//!
//! `begin` / `commit` / `rollback` bracket one state transition. The
//! journal covers the account tree, every token sub-tree touched, the
//! store overlay, and the account id counter.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{ACCOUNT_TREE_DEPTH, TOKEN_TREE_DEPTH};
use crate::error::{KernelError, Result};
use crate::store::{account_key, address_key, frozen_key, meta_key, token_key, KvStore, LeafStore};
use crate::tree::hasher::{hash_account_leaf, hash_token_leaf};
use crate::tree::smt::Smt;
use crate::types::{
    amount, AccountId, AccountLeaf, AccountWitness, Amount, EthAddress, Hash, L2Address,
    OperationMetaBranch, PublicKey, TokenId, TokenLeaf, TokenWitness,
};

const NEXT_ACCOUNT_META: &str = "next_account";

/// Direction of a raw balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    Add,
    Sub,
}

/// The account tree, its token sub-trees, and the backing leaf store.
#[derive(Debug)]
pub struct StateTree<S: KvStore> {
    store: LeafStore<S>,
    account_smt: Smt,
    token_smts: HashMap<AccountId, Smt>,
    empty_token_root: Hash,
    next_account_id: AccountId,

    journaling: bool,
    touched_tokens: HashSet<AccountId>,
    saved_next_account_id: AccountId,
}

impl<S: KvStore> StateTree<S> {
    /// Build the tree over a fresh store. Account id 0 is never
    /// assigned; reserved accounts are created by the state machine.
    pub fn new(kv: S) -> Self {
        let store = LeafStore::new(kv);
        let next_account_id = store
            .get(&meta_key(NEXT_ACCOUNT_META))
            .and_then(|v| v.try_into().ok().map(u32::from_be_bytes))
            .unwrap_or(1);
        Self {
            store,
            account_smt: Smt::new(ACCOUNT_TREE_DEPTH),
            token_smts: HashMap::new(),
            empty_token_root: Smt::empty_root(TOKEN_TREE_DEPTH),
            next_account_id,
            journaling: false,
            touched_tokens: HashSet::new(),
            saved_next_account_id: 0,
        }
    }

    /// Root of the account tree, committing to all balances.
    pub fn root(&self) -> Hash {
        self.account_smt.root()
    }

    #[inline]
    pub fn next_account_id(&self) -> AccountId {
        self.next_account_id
    }

    #[inline]
    pub fn store(&self) -> &LeafStore<S> {
        &self.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut LeafStore<S> {
        &mut self.store
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Fetch an account leaf, or `AccountNotFound`.
    pub fn get_leaf(&self, id: AccountId) -> Result<AccountLeaf> {
        let bytes = self
            .store
            .get(&account_key(id))
            .ok_or(KernelError::AccountNotFound(id))?;
        AccountLeaf::from_bytes(&bytes)
    }

    /// Fetch an account leaf if present.
    pub fn try_get_leaf(&self, id: AccountId) -> Result<Option<AccountLeaf>> {
        match self.store.get(&account_key(id)) {
            Some(bytes) => Ok(Some(AccountLeaf::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up the account id bound to an address pair.
    pub fn account_by_address(
        &self,
        eth: &EthAddress,
        l2: &L2Address,
    ) -> Result<Option<AccountId>> {
        match self.store.get(&address_key(eth, l2)) {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| KernelError::Corrupt(crate::store::prefix::ADDRESS_INDEX))?;
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Create a leaf for a fresh address pair at the next dense id.
    pub fn add_leaf(
        &mut self,
        eth: EthAddress,
        l2: L2Address,
        public_key: PublicKey,
    ) -> Result<AccountLeaf> {
        let id = self.next_account_id;
        debug_assert!((id as u64) < (1u64 << ACCOUNT_TREE_DEPTH));
        self.next_account_id += 1;
        self.store.put(
            meta_key(NEXT_ACCOUNT_META),
            self.next_account_id.to_be_bytes().to_vec(),
        );

        let leaf = AccountLeaf::new(id, eth, l2, public_key, self.empty_token_root);
        self.store
            .put(address_key(&eth, &l2), id.to_be_bytes().to_vec());
        self.write_account(&leaf);
        debug!(account_id = id, "account leaf created");
        Ok(leaf)
    }

    /// Set the primary key, or register an additional proxy key.
    pub fn set_public_key(
        &mut self,
        id: AccountId,
        key: PublicKey,
        as_proxy: bool,
    ) -> Result<AccountLeaf> {
        let mut leaf = self.get_leaf(id)?;
        if as_proxy {
            if !leaf.proxy_public_keys.contains(&key) {
                leaf.proxy_public_keys.push(key);
            }
        } else {
            leaf.public_key = key;
        }
        self.write_account(&leaf);
        Ok(leaf)
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    /// Total balance of a token, zero if the leaf is absent. Errors if
    /// the account does not exist.
    pub fn token_balance(&self, account: AccountId, token: TokenId) -> Result<Amount> {
        self.get_leaf(account)?;
        match self.store.get(&token_key(account, token)) {
            Some(bytes) => Ok(TokenLeaf::from_bytes(&bytes)?.balance),
            None => Ok(0),
        }
    }

    /// Frozen commitment for a token, zero if none.
    pub fn frozen_balance(&self, account: AccountId, token: TokenId) -> Result<Amount> {
        match self.store.get(&frozen_key(account, token)) {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| KernelError::Corrupt(crate::store::prefix::FROZEN))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Spendable balance: total minus frozen.
    pub fn available_balance(&self, account: AccountId, token: TokenId) -> Result<Amount> {
        let total = self.token_balance(account, token)?;
        let frozen = self.frozen_balance(account, token)?;
        Ok(total.saturating_sub(frozen))
    }

    /// Raw balance mutation against the total balance.
    ///
    /// `Sub` fails with `TokenNotFound` when no leaf exists for the
    /// token and with `InsufficientBalance` when the total balance is
    /// smaller than `value`; frozen commitments are not consulted here.
    /// Use [`debit_available`](Self::debit_available) for spend paths.
    pub fn update_token_balance(
        &mut self,
        account: AccountId,
        token: TokenId,
        value: Amount,
        op: BalanceOp,
    ) -> Result<TokenLeaf> {
        self.get_leaf(account)?;
        let existing = match self.store.get(&token_key(account, token)) {
            Some(bytes) => Some(TokenLeaf::from_bytes(&bytes)?.balance),
            None => None,
        };
        let current = existing.unwrap_or(0);
        let balance = match op {
            BalanceOp::Add => amount::checked_add(current, value)?,
            BalanceOp::Sub => {
                if existing.is_none() && value > 0 {
                    return Err(KernelError::TokenNotFound {
                        account_id: account,
                        token_id: token,
                    });
                }
                if value > current {
                    return Err(KernelError::InsufficientBalance {
                        account_id: account,
                        token_id: token,
                        available: current,
                        required: value,
                    });
                }
                current - value
            }
        };
        let leaf = TokenLeaf::new(token, balance);
        self.write_token(account, leaf)?;
        Ok(leaf)
    }

    /// Debit against the available (unfrozen) balance.
    pub fn debit_available(
        &mut self,
        account: AccountId,
        token: TokenId,
        value: Amount,
    ) -> Result<TokenLeaf> {
        let available = self.available_balance(account, token)?;
        if value > available {
            return Err(KernelError::InsufficientBalance {
                account_id: account,
                token_id: token,
                available,
                required: value,
            });
        }
        self.update_token_balance(account, token, value, BalanceOp::Sub)
    }

    /// Move `value` from available into the frozen commitment.
    pub fn freeze(&mut self, account: AccountId, token: TokenId, value: Amount) -> Result<()> {
        let available = self.available_balance(account, token)?;
        if value > available {
            return Err(KernelError::InsufficientBalance {
                account_id: account,
                token_id: token,
                available,
                required: value,
            });
        }
        let frozen = self.frozen_balance(account, token)?;
        self.write_frozen(account, token, amount::checked_add(frozen, value)?);
        Ok(())
    }

    /// Release `value` from the frozen commitment back to available.
    pub fn unfreeze(&mut self, account: AccountId, token: TokenId, value: Amount) -> Result<()> {
        let frozen = self.frozen_balance(account, token)?;
        if value > frozen {
            return Err(KernelError::InsufficientFrozen {
                account_id: account,
                token_id: token,
                frozen,
                required: value,
            });
        }
        self.write_frozen(account, token, frozen - value);
        Ok(())
    }

    fn write_frozen(&mut self, account: AccountId, token: TokenId, frozen: Amount) {
        let key = frozen_key(account, token);
        if frozen == 0 {
            self.store.delete(key);
        } else {
            self.store.put(key, frozen.to_be_bytes().to_vec());
        }
    }

    // ------------------------------------------------------------------
    // Witnesses
    // ------------------------------------------------------------------

    /// Inclusion proof for one (account, token) slot against the current
    /// roots. An absent token is witnessed with a zero balance.
    pub fn prove(&self, account: AccountId, token: TokenId) -> Result<OperationMetaBranch> {
        let leaf = self.get_leaf(account)?;
        let account_witness = AccountWitness {
            id: leaf.account_id,
            eth_address: leaf.eth_address,
            l2_address: leaf.l2_address,
            token_tree_root: leaf.token_tree_root,
            public_key: leaf.public_key,
            sibling_path: self.account_smt.prove(account as u64),
        };
        let balance = match self.store.get(&token_key(account, token)) {
            Some(bytes) => TokenLeaf::from_bytes(&bytes)?.balance,
            None => 0,
        };
        let sibling_path = match self.token_smts.get(&account) {
            Some(smt) => smt.prove(token as u64),
            None => Smt::new(TOKEN_TREE_DEPTH).prove(token as u64),
        };
        Ok(OperationMetaBranch {
            account_witness,
            token_witness: TokenWitness {
                id: token,
                balance,
                sibling_path,
            },
        })
    }

    // ------------------------------------------------------------------
    // Transaction bracket
    // ------------------------------------------------------------------

    /// Start journaling one state transition.
    pub fn begin(&mut self) {
        debug_assert!(!self.journaling);
        self.journaling = true;
        self.saved_next_account_id = self.next_account_id;
        self.account_smt.begin();
    }

    /// Flush the transition: store overlay to durable storage, journals
    /// dropped.
    pub fn commit(&mut self) {
        self.account_smt.commit();
        for account in self.touched_tokens.drain() {
            if let Some(smt) = self.token_smts.get_mut(&account) {
                smt.commit();
            }
        }
        self.store.commit();
        self.journaling = false;
    }

    /// Undo the transition in full.
    pub fn rollback(&mut self) {
        self.account_smt.rollback();
        for account in self.touched_tokens.drain() {
            if let Some(smt) = self.token_smts.get_mut(&account) {
                smt.rollback();
            }
        }
        self.store.discard();
        self.next_account_id = self.saved_next_account_id;
        self.journaling = false;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn write_account(&mut self, leaf: &AccountLeaf) {
        self.store.put(account_key(leaf.account_id), leaf.to_bytes());
        self.account_smt
            .set_leaf(leaf.account_id as u64, hash_account_leaf(leaf));
    }

    fn write_token(&mut self, account: AccountId, leaf: TokenLeaf) -> Result<()> {
        self.store
            .put(token_key(account, leaf.token_id), leaf.to_bytes());
        let token_root = {
            let smt = self.token_smt_mut(account);
            smt.set_leaf(
                leaf.token_id as u64,
                hash_token_leaf(leaf.token_id, leaf.balance),
            );
            smt.root()
        };
        let mut account_leaf = self.get_leaf(account)?;
        account_leaf.token_tree_root = token_root;
        self.write_account(&account_leaf);
        Ok(())
    }

    fn token_smt_mut(&mut self, account: AccountId) -> &mut Smt {
        let newly_touched = self.journaling && self.touched_tokens.insert(account);
        let smt = self
            .token_smts
            .entry(account)
            .or_insert_with(|| Smt::new(TOKEN_TREE_DEPTH));
        if newly_touched {
            smt.begin();
        }
        smt
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
