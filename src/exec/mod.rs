//! The state-transition machine.
//!
//! ## Execution model
//!
//! Single-threaded and deterministic: one [`Operation`] is applied at a
//! time, in block order. `apply` brackets the whole operation in a tree
//! journal plus the store overlay; on success everything is flushed, on
//! the first error everything is discarded, so a failed operation
//! leaves no trace.
//!
//! ## Witnesses
//!
//! Every leaf mutation runs through the prove-mutate-prove bracket: an
//! inclusion proof before, the mutation, an inclusion proof after, both
//! appended to the operation's [`OperationInfo`] along with the root
//! after the mutation. Trade settlements replay their canonical
//! transfers through the same bracket, each as its own sub-operation
//! record, so every operation kind produces the same witness shape.
//!
//! ## Validation order
//!
//! Parameters first (amounts parse, ranges hold), then the acting
//! account is loaded (not-found), then authentication (signature or
//! bridge-operator role), then funds checks, and only then mutation.

use tracing::{debug, info, warn};

use crate::book::{plan_match, Markets};
use crate::config::{ChainConfig, NFT_TOKEN_THRESHOLD};
use crate::error::{KernelError, Result};
use crate::store::{depth_key, meta_key, order_key, prefix, KvStore};
use crate::tree::{BalanceOp, StateTree};
use crate::types::amount::{self, parse_amount, Amount};
use crate::types::{
    AccountId, AssetPair, ChainId, ErcProtocol, EthAddress, Hash, L2Address, NftId, NftStatus,
    OperationInfo, OrderId, PublicKey, Side, SignatureBytes, SpecialInfo, SpotOrder, TokenId,
    TxType,
};
use crate::{auth, fees, nft, queue, settle};

const NEXT_ORDER_META: &str = "next_order";

/// One inbound transaction. Bridge-originated variants carry the L1
/// operator address and a priority id instead of an L2 signature;
/// amounts arrive as decimal strings, the bridge's external encoding.
#[derive(Debug, Clone)]
pub enum Operation {
    Deposit {
        chain_id: ChainId,
        priority_id: i64,
        operator: EthAddress,
        eth_address: EthAddress,
        l2_address: L2Address,
        token_id: TokenId,
        amount: String,
    },
    FullExit {
        chain_id: ChainId,
        priority_id: i64,
        operator: EthAddress,
        account_id: AccountId,
        token_id: TokenId,
    },
    BridgeIn {
        operator: EthAddress,
        account_id: AccountId,
        token_id: TokenId,
        amount: String,
    },
    BridgeOut {
        operator: EthAddress,
        account_id: AccountId,
        token_id: TokenId,
        amount: String,
    },
    Withdraw {
        account_id: AccountId,
        token_id: TokenId,
        amount: String,
        fee: String,
        signature: SignatureBytes,
    },
    Transfer {
        from_account_id: AccountId,
        to_account_id: AccountId,
        token_id: TokenId,
        amount: String,
        fee: String,
        signature: SignatureBytes,
    },
    TransferToNew {
        from_account_id: AccountId,
        to_eth_address: EthAddress,
        to_l2_address: L2Address,
        token_id: TokenId,
        amount: String,
        fee: String,
        signature: SignatureBytes,
    },
    ForceExit {
        account_id: AccountId,
        token_id: TokenId,
        signature: SignatureBytes,
    },
    SetPublicKey {
        account_id: AccountId,
        new_key: PublicKey,
        as_proxy: bool,
        signature: SignatureBytes,
    },
    MintNft {
        creator_account_id: AccountId,
        recipient_account_id: AccountId,
        erc_protocol: ErcProtocol,
        amount: Amount,
        content_hash: Hash,
        signature: SignatureBytes,
    },
    WithdrawNft {
        account_id: AccountId,
        nft_id: NftId,
        amount: Amount,
        signature: SignatureBytes,
    },
    TransferNft {
        from_account_id: AccountId,
        to_account_id: AccountId,
        nft_id: NftId,
        amount: Amount,
        fee: String,
        signature: SignatureBytes,
    },
    PlaceOrder {
        account_id: AccountId,
        pair: AssetPair,
        side: Side,
        price: String,
        quantity: String,
        signature: SignatureBytes,
    },
    RevokeOrder {
        account_id: AccountId,
        order_id: OrderId,
        signature: SignatureBytes,
    },
}

/// The deterministic ledger kernel: account tree, order books, and the
/// operation dispatcher.
pub struct StateMachine<S: KvStore> {
    config: ChainConfig,
    tree: StateTree<S>,
    markets: Markets,
    block_height: u64,
    tx_index: u32,
}

impl<S: KvStore> StateMachine<S> {
    /// Build the kernel over a store, creating the reserved fee and NFT
    /// accounts if the store is fresh.
    pub fn new(kv: S, config: ChainConfig) -> Result<Self> {
        let mut tree = StateTree::new(kv);
        while tree.next_account_id() <= config.nft_account_id {
            let id = tree.next_account_id();
            tree.add_leaf([0u8; 20], reserved_l2_address(id), [0u8; 32])?;
        }
        tree.store_mut().commit();
        info!(root = %hex::encode(tree.root()), "state machine initialized");
        Ok(Self {
            config,
            tree,
            markets: Markets::new(),
            block_height: 0,
            tx_index: 0,
        })
    }

    #[inline]
    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    #[inline]
    pub fn tree(&self) -> &StateTree<S> {
        &self.tree
    }

    #[inline]
    pub fn markets(&self) -> &Markets {
        &self.markets
    }

    #[inline]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Close the current block and start the next.
    pub fn advance_block(&mut self) {
        self.block_height += 1;
        self.tx_index = 0;
        debug!(block_height = self.block_height, "block advanced");
    }

    /// Apply one operation, all-or-nothing.
    ///
    /// Returns the witness records the operation expanded into: one for
    /// the operation itself plus one per settlement sub-operation. On
    /// error the tree, store, and counters are exactly as before.
    pub fn apply(&mut self, op: Operation) -> Result<Vec<OperationInfo>> {
        self.tree.begin();
        match self.apply_inner(&op) {
            Ok(infos) => {
                self.tree.commit();
                self.tx_index += 1;
                Ok(infos)
            }
            Err(err) => {
                self.tree.rollback();
                warn!(%err, "operation rejected");
                Err(err)
            }
        }
    }

    fn apply_inner(&mut self, op: &Operation) -> Result<Vec<OperationInfo>> {
        match op {
            Operation::Deposit {
                chain_id,
                priority_id,
                operator,
                eth_address,
                l2_address,
                token_id,
                amount,
            } => self.deposit(
                *chain_id,
                *priority_id,
                operator,
                *eth_address,
                *l2_address,
                *token_id,
                amount,
            ),
            Operation::FullExit {
                chain_id,
                priority_id,
                operator,
                account_id,
                token_id,
            } => self.full_exit(*chain_id, *priority_id, operator, *account_id, *token_id),
            Operation::BridgeIn {
                operator,
                account_id,
                token_id,
                amount,
            } => self.bridge_transfer(operator, *account_id, *token_id, amount, TxType::BridgeIn),
            Operation::BridgeOut {
                operator,
                account_id,
                token_id,
                amount,
            } => self.bridge_transfer(operator, *account_id, *token_id, amount, TxType::BridgeOut),
            Operation::Withdraw {
                account_id,
                token_id,
                amount,
                fee,
                signature,
            } => self.withdraw(*account_id, *token_id, amount, fee, signature),
            Operation::Transfer {
                from_account_id,
                to_account_id,
                token_id,
                amount,
                fee,
                signature,
            } => self.transfer(
                *from_account_id,
                *to_account_id,
                *token_id,
                amount,
                fee,
                signature,
            ),
            Operation::TransferToNew {
                from_account_id,
                to_eth_address,
                to_l2_address,
                token_id,
                amount,
                fee,
                signature,
            } => self.transfer_to_new(
                *from_account_id,
                *to_eth_address,
                *to_l2_address,
                *token_id,
                amount,
                fee,
                signature,
            ),
            Operation::ForceExit {
                account_id,
                token_id,
                signature,
            } => self.force_exit(*account_id, *token_id, signature),
            Operation::SetPublicKey {
                account_id,
                new_key,
                as_proxy,
                signature,
            } => self.set_public_key(*account_id, *new_key, *as_proxy, signature),
            Operation::MintNft {
                creator_account_id,
                recipient_account_id,
                erc_protocol,
                amount,
                content_hash,
                signature,
            } => self.mint_nft(
                *creator_account_id,
                *recipient_account_id,
                *erc_protocol,
                *amount,
                *content_hash,
                signature,
            ),
            Operation::WithdrawNft {
                account_id,
                nft_id,
                amount,
                signature,
            } => self.withdraw_nft(*account_id, *nft_id, *amount, signature),
            Operation::TransferNft {
                from_account_id,
                to_account_id,
                nft_id,
                amount,
                fee,
                signature,
            } => self.transfer_nft(
                *from_account_id,
                *to_account_id,
                *nft_id,
                *amount,
                fee,
                signature,
            ),
            Operation::PlaceOrder {
                account_id,
                pair,
                side,
                price,
                quantity,
                signature,
            } => self.place_order(*account_id, *pair, *side, price, quantity, signature),
            Operation::RevokeOrder {
                account_id,
                order_id,
                signature,
            } => self.revoke_order(*account_id, *order_id, signature),
        }
    }

    // ------------------------------------------------------------------
    // Bridge-originated operations
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn deposit(
        &mut self,
        chain_id: ChainId,
        priority_id: i64,
        operator: &EthAddress,
        eth_address: EthAddress,
        l2_address: L2Address,
        token_id: TokenId,
        amount: &str,
    ) -> Result<Vec<OperationInfo>> {
        let value = parse_amount(amount)?;
        Self::require_fungible(token_id)?;
        self.require_operator(operator)?;
        queue::admit(self.tree.store_mut(), chain_id, priority_id)?;

        let mut info = self.new_info(TxType::Deposit);
        info.token_id = token_id;
        info.amount = value;

        let account_id = match self.tree.account_by_address(&eth_address, &l2_address)? {
            Some(id) => id,
            None => {
                let leaf = self.tree.add_leaf(eth_address, l2_address, [0u8; 32])?;
                info.special_info = SpecialInfo::NewAccount {
                    account_id: leaf.account_id,
                    eth_address,
                    l2_address,
                };
                leaf.account_id
            }
        };
        self.bracketed(&mut info, account_id, token_id, |tree| {
            tree.update_token_balance(account_id, token_id, value, BalanceOp::Add)?;
            Ok(())
        })?;
        debug!(account_id, token_id, value, "deposit applied");
        Ok(vec![info])
    }

    fn full_exit(
        &mut self,
        chain_id: ChainId,
        priority_id: i64,
        operator: &EthAddress,
        account_id: AccountId,
        token_id: TokenId,
    ) -> Result<Vec<OperationInfo>> {
        Self::require_fungible(token_id)?;
        self.require_operator(operator)?;
        queue::admit(self.tree.store_mut(), chain_id, priority_id)?;
        self.tree.get_leaf(account_id)?;

        // Frozen commitments stay with their open orders; the exit
        // releases everything else.
        let value = self.tree.available_balance(account_id, token_id)?;
        let mut info = self.new_info(TxType::FullExit);
        info.token_id = token_id;
        info.amount = value;
        info.special_info = SpecialInfo::Exit { amount: value };

        self.bracketed(&mut info, account_id, token_id, |tree| {
            tree.update_token_balance(account_id, token_id, value, BalanceOp::Sub)?;
            Ok(())
        })?;
        debug!(account_id, token_id, value, "full exit applied");
        Ok(vec![info])
    }

    fn bridge_transfer(
        &mut self,
        operator: &EthAddress,
        account_id: AccountId,
        token_id: TokenId,
        amount: &str,
        tx_type: TxType,
    ) -> Result<Vec<OperationInfo>> {
        let value = parse_amount(amount)?;
        Self::require_fungible(token_id)?;
        self.require_operator(operator)?;
        self.tree.get_leaf(account_id)?;

        let mut info = self.new_info(tx_type);
        info.token_id = token_id;
        info.amount = value;
        self.bracketed(&mut info, account_id, token_id, |tree| {
            match tx_type {
                TxType::BridgeIn => {
                    tree.update_token_balance(account_id, token_id, value, BalanceOp::Add)?;
                }
                _ => {
                    tree.debit_available(account_id, token_id, value)?;
                }
            }
            Ok(())
        })?;
        Ok(vec![info])
    }

    // ------------------------------------------------------------------
    // User transfers and exits
    // ------------------------------------------------------------------

    fn withdraw(
        &mut self,
        account_id: AccountId,
        token_id: TokenId,
        amount: &str,
        fee: &str,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        let value = parse_amount(amount)?;
        Self::require_fungible(token_id)?;
        let fee_value = self.validated_fee(TxType::Withdraw, fee)?;
        let leaf = self.tree.get_leaf(account_id)?;
        let msg = auth::encode_message(TxType::Withdraw, account_id, token_id, value, fee_value, &[]);
        auth::verify(&leaf, &msg, signature)?;

        let mut info = self.new_info(TxType::Withdraw);
        info.token_id = token_id;
        info.amount = value;
        info.fee_amount = fee_value;
        info.signature = *signature;

        self.bracketed(&mut info, account_id, token_id, |tree| {
            tree.debit_available(account_id, token_id, value)?;
            Ok(())
        })?;
        self.charge_flat_fee(&mut info, account_id, fee_value)?;
        Ok(vec![info])
    }

    fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        token_id: TokenId,
        amount: &str,
        fee: &str,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        if from == to {
            return Err(KernelError::UnsupportedOperation("transfer to self"));
        }
        let value = parse_amount(amount)?;
        Self::require_fungible(token_id)?;
        let fee_value = self.validated_fee(TxType::Transfer, fee)?;
        let leaf = self.tree.get_leaf(from)?;
        self.tree.get_leaf(to)?;
        let msg = auth::encode_message(
            TxType::Transfer,
            from,
            token_id,
            value,
            fee_value,
            &to.to_be_bytes(),
        );
        auth::verify(&leaf, &msg, signature)?;

        let mut info = self.new_info(TxType::Transfer);
        info.token_id = token_id;
        info.amount = value;
        info.fee_amount = fee_value;
        info.signature = *signature;

        self.bracketed(&mut info, from, token_id, |tree| {
            tree.debit_available(from, token_id, value)?;
            Ok(())
        })?;
        self.bracketed(&mut info, to, token_id, |tree| {
            tree.update_token_balance(to, token_id, value, BalanceOp::Add)?;
            Ok(())
        })?;
        self.charge_flat_fee(&mut info, from, fee_value)?;
        Ok(vec![info])
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_to_new(
        &mut self,
        from: AccountId,
        to_eth_address: EthAddress,
        to_l2_address: L2Address,
        token_id: TokenId,
        amount: &str,
        fee: &str,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        let value = parse_amount(amount)?;
        Self::require_fungible(token_id)?;
        let fee_value = self.validated_fee(TxType::TransferToNew, fee)?;
        if self
            .tree
            .account_by_address(&to_eth_address, &to_l2_address)?
            .is_some()
        {
            return Err(KernelError::UnsupportedOperation(
                "recipient address already registered",
            ));
        }
        let leaf = self.tree.get_leaf(from)?;
        let mut aux = Vec::with_capacity(52);
        aux.extend_from_slice(&to_eth_address);
        aux.extend_from_slice(&to_l2_address);
        let msg =
            auth::encode_message(TxType::TransferToNew, from, token_id, value, fee_value, &aux);
        auth::verify(&leaf, &msg, signature)?;

        let recipient = self
            .tree
            .add_leaf(to_eth_address, to_l2_address, [0u8; 32])?;
        let to = recipient.account_id;

        let mut info = self.new_info(TxType::TransferToNew);
        info.token_id = token_id;
        info.amount = value;
        info.fee_amount = fee_value;
        info.signature = *signature;
        info.special_info = SpecialInfo::NewAccount {
            account_id: to,
            eth_address: to_eth_address,
            l2_address: to_l2_address,
        };

        self.bracketed(&mut info, from, token_id, |tree| {
            tree.debit_available(from, token_id, value)?;
            Ok(())
        })?;
        self.bracketed(&mut info, to, token_id, |tree| {
            tree.update_token_balance(to, token_id, value, BalanceOp::Add)?;
            Ok(())
        })?;
        self.charge_flat_fee(&mut info, from, fee_value)?;
        Ok(vec![info])
    }

    fn force_exit(
        &mut self,
        account_id: AccountId,
        token_id: TokenId,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        Self::require_fungible(token_id)?;
        let leaf = self.tree.get_leaf(account_id)?;
        let msg = auth::encode_message(TxType::ForceExit, account_id, token_id, 0, 0, &[]);
        auth::verify(&leaf, &msg, signature)?;

        let value = self.tree.available_balance(account_id, token_id)?;
        let mut info = self.new_info(TxType::ForceExit);
        info.token_id = token_id;
        info.amount = value;
        info.signature = *signature;
        info.special_info = SpecialInfo::Exit { amount: value };

        self.bracketed(&mut info, account_id, token_id, |tree| {
            tree.update_token_balance(account_id, token_id, value, BalanceOp::Sub)?;
            Ok(())
        })?;
        Ok(vec![info])
    }

    fn set_public_key(
        &mut self,
        account_id: AccountId,
        new_key: PublicKey,
        as_proxy: bool,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        let leaf = self.tree.get_leaf(account_id)?;
        let mut aux = Vec::with_capacity(33);
        aux.extend_from_slice(&new_key);
        aux.push(as_proxy as u8);
        let msg = auth::encode_message(TxType::SetPublicKey, account_id, 0, 0, 0, &aux);
        // A fresh account carries an all-zero key; its first key set is
        // authorized by the operation itself rather than a signature.
        if leaf.public_key != [0u8; 32] {
            auth::verify(&leaf, &msg, signature)?;
        }

        let mut info = self.new_info(TxType::SetPublicKey);
        info.signature = *signature;
        self.bracketed(&mut info, account_id, 0, |tree| {
            tree.set_public_key(account_id, new_key, as_proxy)?;
            Ok(())
        })?;
        Ok(vec![info])
    }

    // ------------------------------------------------------------------
    // NFT operations
    // ------------------------------------------------------------------

    fn mint_nft(
        &mut self,
        creator: AccountId,
        recipient: AccountId,
        protocol: ErcProtocol,
        mint_amount: Amount,
        content_hash: Hash,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        nft::validate_mint_amount(protocol, mint_amount)?;
        let creator_leaf = self.tree.get_leaf(creator)?;
        self.tree.get_leaf(recipient)?;
        nft::assert_unique(self.tree.store(), &content_hash)?;

        let fee_value = {
            let scheduled = fees::get(self.tree.store(), TxType::MintNft, self.config.fee_token)?;
            if scheduled.current > 0 {
                scheduled.current
            } else {
                self.config.nft_mint_fee
            }
        };
        let mut aux = Vec::with_capacity(38);
        aux.extend_from_slice(&recipient.to_be_bytes());
        aux.extend_from_slice(&protocol.to_u16().to_be_bytes());
        aux.extend_from_slice(&content_hash);
        let msg =
            auth::encode_message(TxType::MintNft, creator, 0, mint_amount, fee_value, &aux);
        auth::verify(&creator_leaf, &msg, signature)?;

        let mut info = self.new_info(TxType::MintNft);
        info.amount = mint_amount;
        info.fee_amount = fee_value;
        info.signature = *signature;

        self.charge_flat_fee(&mut info, creator, fee_value)?;

        // Per-creator serial, tracked on the reserved counter token.
        let counter_token = self.config.nft_counter_token;
        let serial = self.tree.token_balance(creator, counter_token)?;
        self.bracketed(&mut info, creator, counter_token, |tree| {
            tree.update_token_balance(creator, counter_token, 1, BalanceOp::Add)?;
            Ok(())
        })?;

        // Global issuance counter on the system NFT account is the
        // source of the instance id.
        let system = self.config.nft_account_id;
        let minted = self.tree.token_balance(system, counter_token)?;
        let nft_id = nft::nft_id_for_counter(minted);
        self.bracketed(&mut info, system, counter_token, |tree| {
            tree.update_token_balance(system, counter_token, 1, BalanceOp::Add)?;
            Ok(())
        })?;

        let status = NftStatus {
            id: nft_id,
            creator_account_id: creator,
            creator_eth_address: creator_leaf.eth_address,
            creator_serial_id: serial,
            erc_protocol: protocol,
            mint_amount,
            burned_amount: 0,
            content_hash,
        };

        // Synthetic balance on the system account binds the registry
        // record into the tree.
        let synthetic = nft::synthetic_balance(&status);
        let instance_token = nft_id as TokenId;
        self.bracketed(&mut info, system, instance_token, |tree| {
            tree.update_token_balance(system, instance_token, synthetic, BalanceOp::Add)?;
            Ok(())
        })?;
        self.bracketed(&mut info, recipient, instance_token, |tree| {
            tree.update_token_balance(recipient, instance_token, mint_amount, BalanceOp::Add)?;
            Ok(())
        })?;

        nft::save_status(self.tree.store_mut(), &status)?;
        info.token_id = instance_token;
        info.special_info = SpecialInfo::Nft {
            nft_id,
            creator_serial_id: serial,
            content_hash,
        };
        info!(nft_id, creator, recipient, mint_amount, "NFT minted");
        Ok(vec![info])
    }

    fn withdraw_nft(
        &mut self,
        account_id: AccountId,
        nft_id: NftId,
        burn_amount: Amount,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        if burn_amount == 0 {
            return Err(KernelError::InvalidAmount("0".to_string()));
        }
        let mut status = nft::load_status(self.tree.store(), nft_id)?;
        let leaf = self.tree.get_leaf(account_id)?;
        let msg = auth::encode_message(
            TxType::WithdrawNft,
            account_id,
            0,
            burn_amount,
            0,
            &nft_id.to_be_bytes(),
        );
        auth::verify(&leaf, &msg, signature)?;

        // Registry integrity: the system account's synthetic balance
        // must still match the record.
        let system = self.config.nft_account_id;
        let instance_token = nft_id as TokenId;
        if self.tree.token_balance(system, instance_token)? != nft::synthetic_balance(&status) {
            return Err(KernelError::Corrupt(prefix::NFT_STATUS));
        }
        if burn_amount > nft::outstanding(&status) {
            return Err(KernelError::InvalidAmount(format!(
                "burn {} exceeds outstanding supply {}",
                burn_amount,
                nft::outstanding(&status)
            )));
        }

        let mut info = self.new_info(TxType::WithdrawNft);
        info.token_id = instance_token;
        info.amount = burn_amount;
        info.signature = *signature;

        self.bracketed(&mut info, account_id, instance_token, |tree| {
            tree.debit_available(account_id, instance_token, burn_amount)?;
            Ok(())
        })?;

        status.burned_amount = amount::checked_add(status.burned_amount, burn_amount)?;
        nft::save_status(self.tree.store_mut(), &status)?;
        Ok(vec![info])
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_nft(
        &mut self,
        from: AccountId,
        to: AccountId,
        nft_id: NftId,
        value: Amount,
        fee: &str,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        if from == to {
            return Err(KernelError::UnsupportedOperation("transfer to self"));
        }
        if value == 0 {
            return Err(KernelError::InvalidAmount("0".to_string()));
        }
        let fee_value = self.validated_fee(TxType::TransferNft, fee)?;
        nft::load_status(self.tree.store(), nft_id)?;
        let leaf = self.tree.get_leaf(from)?;
        self.tree.get_leaf(to)?;
        let mut aux = Vec::with_capacity(12);
        aux.extend_from_slice(&to.to_be_bytes());
        aux.extend_from_slice(&nft_id.to_be_bytes());
        let msg = auth::encode_message(TxType::TransferNft, from, 0, value, fee_value, &aux);
        auth::verify(&leaf, &msg, signature)?;

        let instance_token = nft_id as TokenId;
        let mut info = self.new_info(TxType::TransferNft);
        info.token_id = instance_token;
        info.amount = value;
        info.fee_amount = fee_value;
        info.signature = *signature;

        self.bracketed(&mut info, from, instance_token, |tree| {
            tree.debit_available(from, instance_token, value)?;
            Ok(())
        })?;
        self.bracketed(&mut info, to, instance_token, |tree| {
            tree.update_token_balance(to, instance_token, value, BalanceOp::Add)?;
            Ok(())
        })?;
        self.charge_flat_fee(&mut info, from, fee_value)?;
        Ok(vec![info])
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    fn place_order(
        &mut self,
        account_id: AccountId,
        pair: AssetPair,
        side: Side,
        price: &str,
        quantity: &str,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        let price_value = parse_amount(price)?;
        let quantity_value = parse_amount(quantity)?;
        if pair.left == pair.right
            || pair.left >= NFT_TOKEN_THRESHOLD
            || pair.right >= NFT_TOKEN_THRESHOLD
        {
            return Err(KernelError::UnsupportedOperation(
                "orders are limited to distinct fungible tokens",
            ));
        }
        let leaf = self.tree.get_leaf(account_id)?;
        let mut aux = Vec::with_capacity(17);
        aux.extend_from_slice(&pair.left.to_be_bytes());
        aux.extend_from_slice(&pair.right.to_be_bytes());
        aux.push(side.to_u8());
        aux.extend_from_slice(&price_value.to_be_bytes());
        let msg = auth::encode_message(
            TxType::PlaceOrder,
            account_id,
            pair.left,
            quantity_value,
            0,
            &aux,
        );
        auth::verify(&leaf, &msg, signature)?;

        let (maker_rate, taker_rate) = fees::trade_rates(self.tree.store(), pair.right)?;
        let order_id = self.allocate_order_id()?;
        let mut taker = SpotOrder::new(
            order_id,
            account_id,
            leaf.l2_address,
            pair,
            side,
            price_value,
            quantity_value,
            maker_rate,
            taker_rate,
        );

        // Freeze the full commitment up front; fills release it leg by
        // leg and a resting remainder keeps the rest.
        let commitment = taker.commitment_for(quantity_value)?;
        self.tree
            .freeze(account_id, taker.commit_token(), commitment)?;
        taker.frozen = commitment;

        let mut info = self.new_info(TxType::PlaceOrder);
        info.token_id = pair.left;
        info.amount = quantity_value;
        info.signature = *signature;

        let plan = plan_match(self.markets.book_mut(pair), &taker, self.config.max_match_count);
        let rests = plan.taker_remaining > 0;
        let mut infos = vec![info];
        let mut applied = Vec::with_capacity(plan.fills.len());

        for (index, fill) in plan.fills.iter().enumerate() {
            let maker = self
                .markets
                .book(pair)
                .and_then(|b| b.get(fill.maker_order_id))
                .cloned()
                .ok_or(KernelError::OrderNotFound(fill.maker_order_id))?;
            let taker_completed = !rests && index + 1 == plan.fills.len();
            let settlement = settle::settle_trade(
                &taker,
                &maker,
                fill.quantity,
                taker_completed,
                self.config.fee_account_id,
            )?;

            for transfer in &settlement.transfers {
                let tx_type = if transfer.to == self.config.fee_account_id
                    && transfer.release == 0
                    && transfer.from != transfer.to
                {
                    TxType::FeeCollect
                } else {
                    TxType::Swap
                };
                let mut leg_info = self.new_info(tx_type);
                leg_info.op_index = infos.len() as u32;
                leg_info.token_id = transfer.token;
                leg_info.amount = transfer.amount;
                self.apply_settlement_transfer(&mut leg_info, transfer)?;
                infos.push(leg_info);
            }

            taker.fill(fill.quantity, settlement.right_amount, settlement.taker_fee)?;
            taker.frozen = taker.frozen.saturating_sub(settlement.taker_release);
            applied.push((
                fill.maker_order_id,
                fill.quantity,
                settlement.right_amount,
                settlement.maker_fee,
                settlement.maker_release,
                fill.price,
            ));
        }

        // Tree work is done; now the book and records can move.
        let trade_count = applied.len() as u32;
        let mut touched_prices = Vec::with_capacity(applied.len() + 1);
        for (maker_id, qty, quote, maker_fee, maker_release, maker_price) in applied {
            let book = self.markets.book_mut(pair);
            let mut maker_updated = book.apply_fill(maker_id, qty, quote, maker_fee)?;
            maker_updated.frozen = maker_updated.frozen.saturating_sub(maker_release);
            if let Some(resting) = book.get_mut(maker_id) {
                resting.frozen = maker_updated.frozen;
            }
            self.tree
                .store_mut()
                .put(order_key(maker_id), maker_updated.to_bytes()?);
            touched_prices.push((side.opposite(), maker_price));
        }
        if rests {
            self.markets.book_mut(pair).insert(taker.clone())?;
            touched_prices.push((side, price_value));
        }
        self.tree
            .store_mut()
            .put(order_key(order_id), taker.to_bytes()?);
        for (depth_side, depth_price) in touched_prices {
            self.sync_depth(pair, depth_side, depth_price);
        }

        infos[0].special_info = SpecialInfo::Trade {
            order_id,
            filled: quantity_value - plan.taker_remaining,
            trade_count,
            resting: rests,
        };
        debug!(
            order_id,
            account_id,
            trade_count,
            resting = rests,
            "order placed"
        );
        Ok(infos)
    }

    fn revoke_order(
        &mut self,
        account_id: AccountId,
        order_id: OrderId,
        signature: &SignatureBytes,
    ) -> Result<Vec<OperationInfo>> {
        let bytes = self
            .tree
            .store()
            .get(&order_key(order_id))
            .ok_or(KernelError::OrderNotFound(order_id))?;
        let mut order = SpotOrder::from_bytes(&bytes)?;
        let leaf = self.tree.get_leaf(account_id)?;
        if order.account_id != account_id {
            return Err(KernelError::Unauthorized("order belongs to another account"));
        }
        let msg = auth::encode_message(
            TxType::RevokeOrder,
            account_id,
            0,
            0,
            0,
            &order_id.to_be_bytes(),
        );
        auth::verify(&leaf, &msg, signature)?;

        let released = order.frozen;
        order.revoke()?;
        self.tree
            .unfreeze(account_id, order.commit_token(), released)?;
        order.frozen = 0;
        self.tree
            .store_mut()
            .put(order_key(order_id), order.to_bytes()?);

        if let Some(book) = self.markets.book_with_order_mut(order_id) {
            book.remove(order_id);
        }
        self.sync_depth(order.pair, order.side, order.price);

        let mut info = self.new_info(TxType::RevokeOrder);
        info.token_id = order.commit_token();
        info.amount = released;
        info.signature = *signature;
        info.push_root(self.tree.root());
        info.special_info = SpecialInfo::Revoke { order_id, released };
        debug!(order_id, released, "order revoked");
        Ok(vec![info])
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn new_info(&self, tx_type: TxType) -> OperationInfo {
        let mut info = OperationInfo::new(self.block_height, self.tx_index, tx_type);
        info.push_root(self.tree.root());
        info
    }

    /// Prove-mutate-prove: the uniform witness bracket around one leaf
    /// mutation.
    fn bracketed<F>(
        &mut self,
        info: &mut OperationInfo,
        account: AccountId,
        token: TokenId,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut StateTree<S>) -> Result<()>,
    {
        let before = self.tree.prove(account, token)?;
        mutate(&mut self.tree)?;
        let after = self.tree.prove(account, token)?;
        info.push_branch(before, after);
        info.push_root(self.tree.root());
        Ok(())
    }

    /// Debit the payer and credit the fee collector, both bracketed.
    fn charge_flat_fee(
        &mut self,
        info: &mut OperationInfo,
        payer: AccountId,
        fee_value: Amount,
    ) -> Result<()> {
        if fee_value == 0 {
            return Ok(());
        }
        let fee_token = self.config.fee_token;
        let collector = self.config.fee_account_id;
        self.bracketed(info, payer, fee_token, |tree| {
            tree.debit_available(payer, fee_token, fee_value)?;
            Ok(())
        })?;
        self.bracketed(info, collector, fee_token, |tree| {
            tree.update_token_balance(collector, fee_token, fee_value, BalanceOp::Add)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Execute one canonical settlement transfer through the tree.
    fn apply_settlement_transfer(
        &mut self,
        info: &mut OperationInfo,
        transfer: &settle::SettlementTransfer,
    ) -> Result<()> {
        let from = transfer.from;
        let to = transfer.to;
        let token = transfer.token;
        let value = transfer.amount;
        let release = transfer.release;

        self.bracketed(info, from, token, |tree| {
            if release > 0 {
                tree.unfreeze(from, token, release)?;
            }
            if value > 0 && from != to {
                tree.debit_available(from, token, value)?;
            }
            Ok(())
        })?;
        if value > 0 && from != to {
            self.bracketed(info, to, token, |tree| {
                tree.update_token_balance(to, token, value, BalanceOp::Add)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Validate a declared flat fee against the schedule (current or
    /// previous value during a handover window).
    fn validated_fee(&self, tx_type: TxType, fee: &str) -> Result<Amount> {
        let value = amount::to_fixed(fee).ok_or_else(|| KernelError::InvalidAmount(fee.into()))?;
        let entry = fees::get(self.tree.store(), tx_type, self.config.fee_token)?;
        if !entry.accepts(value) {
            return Err(KernelError::InvalidAmount(format!(
                "fee {} not accepted by schedule",
                fee
            )));
        }
        Ok(value)
    }

    fn require_operator(&self, operator: &EthAddress) -> Result<()> {
        if !self.config.is_bridge_operator(operator) {
            return Err(KernelError::Unauthorized("not a bridge operator"));
        }
        Ok(())
    }

    /// Fungible operations must stay below the NFT id range. This covers
    /// the issuance-counter token as well, so deposits and transfers can
    /// never forge the counters the mint path reads.
    fn require_fungible(token_id: TokenId) -> Result<()> {
        if token_id >= NFT_TOKEN_THRESHOLD {
            return Err(KernelError::InvalidTokenId(token_id));
        }
        Ok(())
    }

    fn allocate_order_id(&mut self) -> Result<OrderId> {
        let key = meta_key(NEXT_ORDER_META);
        let next = match self.tree.store().get(&key) {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .try_into()
                    .map_err(|_| KernelError::Corrupt(prefix::META))?;
                u64::from_be_bytes(bytes)
            }
            None => 1,
        };
        self.tree
            .store_mut()
            .put(key, (next + 1).to_be_bytes().to_vec());
        Ok(next)
    }

    /// Rewrite the persisted depth row for one price after book changes.
    fn sync_depth(&mut self, pair: AssetPair, side: Side, price: Amount) {
        let total = self
            .markets
            .book(pair)
            .map_or(0, |b| b.level_total(side, price));
        let key = depth_key(pair.left, pair.right, side.to_u8(), price);
        if total == 0 {
            self.tree.store_mut().delete(key);
        } else {
            self.tree.store_mut().put(key, total.to_be_bytes().to_vec());
        }
    }

    /// Manager-only: update a flat fee schedule entry.
    pub fn set_flat_fee(
        &mut self,
        manager: &EthAddress,
        tx_type: TxType,
        token: TokenId,
        value: Amount,
    ) -> Result<()> {
        if !self.config.is_manager(manager) {
            return Err(KernelError::Unauthorized("fee updates require manager role"));
        }
        fees::set(self.tree.store_mut(), tx_type, token, value)?;
        self.tree.store_mut().commit();
        Ok(())
    }

    /// Manager-only: update the trading rates for a market.
    pub fn set_trade_rates(
        &mut self,
        manager: &EthAddress,
        right_token: TokenId,
        maker_rate: Amount,
        taker_rate: Amount,
    ) -> Result<()> {
        if !self.config.is_manager(manager) {
            return Err(KernelError::Unauthorized("fee updates require manager role"));
        }
        fees::set_trade_rates(self.tree.store_mut(), right_token, maker_rate, taker_rate)?;
        self.tree.store_mut().commit();
        Ok(())
    }
}

/// Deterministic placeholder L2 address for reserved system accounts.
fn reserved_l2_address(id: AccountId) -> L2Address {
    let mut addr = [0u8; 32];
    addr[28..].copy_from_slice(&id.to_be_bytes());
    addr
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::store::MemoryKv;
    use crate::types::amount::to_fixed;

    const OPERATOR: EthAddress = [0xAA; 20];

    fn machine() -> StateMachine<MemoryKv> {
        let config = ChainConfig::new(vec![OPERATOR], Vec::new());
        StateMachine::new(MemoryKv::new(), config).unwrap()
    }

    fn keypair(seed: u64) -> SigningKey {
        SigningKey::generate(&mut StdRng::seed_from_u64(seed))
    }

    /// Deposit for a fresh address and return the new account id.
    fn deposit(
        m: &mut StateMachine<MemoryKv>,
        priority_id: i64,
        seed: u8,
        token_id: TokenId,
        amount: &str,
    ) -> AccountId {
        let infos = m
            .apply(Operation::Deposit {
                chain_id: 1,
                priority_id,
                operator: OPERATOR,
                eth_address: [seed; 20],
                l2_address: [seed; 32],
                token_id,
                amount: amount.to_string(),
            })
            .unwrap();
        m.tree()
            .account_by_address(&[seed; 20], &[seed; 32])
            .unwrap()
            .unwrap_or_else(|| panic!("account missing after {:?}", infos))
    }

    /// First key set on a fresh account needs no signature.
    fn bind_key(m: &mut StateMachine<MemoryKv>, account_id: AccountId, sk: &SigningKey) {
        m.apply(Operation::SetPublicKey {
            account_id,
            new_key: auth::public_key(sk),
            as_proxy: false,
            signature: [0u8; 64],
        })
        .unwrap();
    }

    #[test]
    fn test_reserved_accounts_created() {
        let m = machine();
        assert!(m.tree().get_leaf(1).is_ok());
        assert!(m.tree().get_leaf(2).is_ok());
        assert_eq!(m.tree().next_account_id(), 3);
    }

    #[test]
    fn test_deposit_creates_account_with_witnesses() {
        let mut m = machine();
        let root_before = m.root();
        let infos = m
            .apply(Operation::Deposit {
                chain_id: 1,
                priority_id: 0,
                operator: OPERATOR,
                eth_address: [7u8; 20],
                l2_address: [7u8; 32],
                token_id: 0,
                amount: "1000".to_string(),
            })
            .unwrap();

        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert!(matches!(
            info.special_info,
            SpecialInfo::NewAccount { account_id: 3, .. }
        ));
        // One prove-mutate-prove bracket, before balance zero
        assert_eq!(info.operation_branches.len(), 1);
        assert_eq!(info.operation_branches[0].before.token_witness.balance, 0);
        assert_eq!(
            info.operation_branches[0].after.token_witness.balance,
            to_fixed("1000").unwrap()
        );
        assert_eq!(info.root_transition().unwrap().0, root_before);
        assert_eq!(info.root_transition().unwrap().1, m.root());
        assert_eq!(m.tree().token_balance(3, 0).unwrap(), to_fixed("1000").unwrap());
    }

    #[test]
    fn test_deposit_rejects_priority_gap() {
        let mut m = machine();
        deposit(&mut m, 0, 7, 0, "10");
        let err = m
            .apply(Operation::Deposit {
                chain_id: 1,
                priority_id: 2,
                operator: OPERATOR,
                eth_address: [8u8; 20],
                l2_address: [8u8; 32],
                token_id: 0,
                amount: "10".to_string(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::OutOfOrder {
                expected: 1,
                claimed: 2,
                ..
            }
        ));
        // Rejected claim did not advance the counter
        deposit(&mut m, 1, 8, 0, "10");
    }

    #[test]
    fn test_deposit_requires_operator_role() {
        let mut m = machine();
        let err = m
            .apply(Operation::Deposit {
                chain_id: 1,
                priority_id: 0,
                operator: [0xBB; 20],
                eth_address: [7u8; 20],
                l2_address: [7u8; 32],
                token_id: 0,
                amount: "10".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::Unauthorized(_)));
    }

    #[test]
    fn test_deposit_rejects_nft_range_tokens() {
        let mut m = machine();
        // The counter token and instance ids are off limits to deposits
        for token_id in [NFT_TOKEN_THRESHOLD, 300] {
            let err = m
                .apply(Operation::Deposit {
                    chain_id: 1,
                    priority_id: 0,
                    operator: OPERATOR,
                    eth_address: [7u8; 20],
                    l2_address: [7u8; 32],
                    token_id,
                    amount: "5".to_string(),
                })
                .unwrap_err();
            assert_eq!(err, KernelError::InvalidTokenId(token_id));
        }
        // Rejections consumed no priority id and created no account
        assert_eq!(m.tree().next_account_id(), 3);
        deposit(&mut m, 0, 7, 0, "5");
    }

    #[test]
    fn test_transfer_rejects_nft_range_token() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 0, "100");
        let bob = deposit(&mut m, 1, 8, 0, "100");
        bind_key(&mut m, alice, &sk);

        let msg = auth::encode_message(
            TxType::Transfer,
            alice,
            300,
            to_fixed("1").unwrap(),
            0,
            &bob.to_be_bytes(),
        );
        let err = m
            .apply(Operation::Transfer {
                from_account_id: alice,
                to_account_id: bob,
                token_id: 300,
                amount: "1".to_string(),
                fee: "0".to_string(),
                signature: auth::sign(&sk, &msg),
            })
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidTokenId(300));
    }

    #[test]
    fn test_transfer_moves_balance_and_rolls_back_on_failure() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 0, "1000");
        let bob = deposit(&mut m, 1, 8, 0, "50");
        bind_key(&mut m, alice, &sk);

        let msg = auth::encode_message(
            TxType::Transfer,
            alice,
            0,
            to_fixed("300").unwrap(),
            0,
            &bob.to_be_bytes(),
        );
        m.apply(Operation::Transfer {
            from_account_id: alice,
            to_account_id: bob,
            token_id: 0,
            amount: "300".to_string(),
            fee: "0".to_string(),
            signature: auth::sign(&sk, &msg),
        })
        .unwrap();
        assert_eq!(m.tree().token_balance(alice, 0).unwrap(), to_fixed("700").unwrap());
        assert_eq!(m.tree().token_balance(bob, 0).unwrap(), to_fixed("350").unwrap());

        // Overdraw fails and leaves everything untouched
        let root = m.root();
        let msg = auth::encode_message(
            TxType::Transfer,
            alice,
            0,
            to_fixed("9000").unwrap(),
            0,
            &bob.to_be_bytes(),
        );
        let err = m
            .apply(Operation::Transfer {
                from_account_id: alice,
                to_account_id: bob,
                token_id: 0,
                amount: "9000".to_string(),
                fee: "0".to_string(),
                signature: auth::sign(&sk, &msg),
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::InsufficientBalance { .. }));
        assert_eq!(m.root(), root);
        assert_eq!(m.tree().token_balance(alice, 0).unwrap(), to_fixed("700").unwrap());
    }

    #[test]
    fn test_transfer_to_self_rejected() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 0, "1000");
        bind_key(&mut m, alice, &sk);
        let err = m
            .apply(Operation::Transfer {
                from_account_id: alice,
                to_account_id: alice,
                token_id: 0,
                amount: "10".to_string(),
                fee: "0".to_string(),
                signature: [0u8; 64],
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_transfer_bad_signature_rejected() {
        let mut m = machine();
        let sk = keypair(1);
        let intruder = keypair(2);
        let alice = deposit(&mut m, 0, 7, 0, "1000");
        let bob = deposit(&mut m, 1, 8, 0, "50");
        bind_key(&mut m, alice, &sk);

        let msg = auth::encode_message(
            TxType::Transfer,
            alice,
            0,
            to_fixed("300").unwrap(),
            0,
            &bob.to_be_bytes(),
        );
        let err = m
            .apply(Operation::Transfer {
                from_account_id: alice,
                to_account_id: bob,
                token_id: 0,
                amount: "300".to_string(),
                fee: "0".to_string(),
                signature: auth::sign(&intruder, &msg),
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::AuthenticationFailed(a) if a == alice));
    }

    #[test]
    fn test_place_order_matches_and_settles() {
        let mut m = machine();
        let maker_sk = keypair(1);
        let taker_sk = keypair(2);
        // Maker sells token 1 for token 2; taker pays token 2
        let maker = deposit(&mut m, 0, 7, 1, "50");
        let taker = deposit(&mut m, 1, 8, 2, "10000");
        bind_key(&mut m, maker, &maker_sk);
        bind_key(&mut m, taker, &taker_sk);

        let pair = AssetPair::new(1, 2);
        place(&mut m, &maker_sk, maker, pair, Side::Sell, "100", "50");
        let infos = place(&mut m, &taker_sk, taker, pair, Side::Buy, "100", "50");

        // Primary info plus one Swap leg per principal transfer
        assert!(matches!(
            infos[0].special_info,
            SpecialInfo::Trade {
                trade_count: 1,
                resting: false,
                ..
            }
        ));
        assert_eq!(m.tree().token_balance(taker, 1).unwrap(), to_fixed("50").unwrap());
        assert_eq!(m.tree().token_balance(maker, 2).unwrap(), to_fixed("5000").unwrap());
        assert_eq!(m.tree().token_balance(taker, 2).unwrap(), to_fixed("5000").unwrap());
        assert_eq!(m.tree().token_balance(maker, 1).unwrap(), 0);
        // No commitments left behind
        assert_eq!(m.tree().frozen_balance(maker, 1).unwrap(), 0);
        assert_eq!(m.tree().frozen_balance(taker, 2).unwrap(), 0);
        assert!(m.markets().book(pair).unwrap().is_empty());
    }

    #[test]
    fn test_place_order_rests_and_freezes() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 2, "10000");
        bind_key(&mut m, alice, &sk);

        let pair = AssetPair::new(1, 2);
        let infos = place(&mut m, &sk, alice, pair, Side::Buy, "100", "50");

        let order_id = match infos[0].special_info {
            SpecialInfo::Trade { order_id, resting, .. } => {
                assert!(resting);
                order_id
            }
            ref other => panic!("unexpected special info {:?}", other),
        };
        // Buy commitment = principal, no fee headroom at zero rates
        assert_eq!(m.tree().frozen_balance(alice, 2).unwrap(), to_fixed("5000").unwrap());
        assert_eq!(m.tree().available_balance(alice, 2).unwrap(), to_fixed("5000").unwrap());

        // Revoke releases the whole commitment
        let msg = auth::encode_message(
            TxType::RevokeOrder,
            alice,
            0,
            0,
            0,
            &order_id.to_be_bytes(),
        );
        m.apply(Operation::RevokeOrder {
            account_id: alice,
            order_id,
            signature: auth::sign(&sk, &msg),
        })
        .unwrap();
        assert_eq!(m.tree().frozen_balance(alice, 2).unwrap(), 0);
        assert!(m.markets().book(pair).unwrap().is_empty());

        // A revoked order cannot be revoked again
        let err = m
            .apply(Operation::RevokeOrder {
                account_id: alice,
                order_id,
                signature: auth::sign(&sk, &msg),
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::OrderClosed(_)));
    }

    #[test]
    fn test_mint_and_withdraw_nft() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 0, "1000");
        bind_key(&mut m, alice, &sk);

        let infos = mint(&mut m, &sk, alice, alice, ErcProtocol::Erc1155, 5, [0xCD; 32]);
        let nft_id = match infos[0].special_info {
            SpecialInfo::Nft { nft_id, .. } => nft_id,
            ref other => panic!("unexpected special info {:?}", other),
        };
        assert_eq!(nft_id, 257);
        assert_eq!(m.tree().token_balance(alice, nft_id as TokenId).unwrap(), 5);
        // Issuance counter and creator serial both advanced
        assert_eq!(m.tree().token_balance(2, 256).unwrap(), 1);
        assert_eq!(m.tree().token_balance(alice, 256).unwrap(), 1);

        // Same content hash cannot be minted twice
        let err = mint_err(&mut m, &sk, alice, alice, ErcProtocol::Erc1155, 5, [0xCD; 32]);
        assert!(matches!(err, KernelError::DuplicateContentHash(_)));

        let msg = auth::encode_message(
            TxType::WithdrawNft,
            alice,
            0,
            2,
            0,
            &nft_id.to_be_bytes(),
        );
        m.apply(Operation::WithdrawNft {
            account_id: alice,
            nft_id,
            amount: 2,
            signature: auth::sign(&sk, &msg),
        })
        .unwrap();
        assert_eq!(m.tree().token_balance(alice, nft_id as TokenId).unwrap(), 3);
        let status = nft::load_status(m.tree().store(), nft_id).unwrap();
        assert_eq!(status.burned_amount, 2);

        // Burn beyond outstanding supply is rejected
        let msg = auth::encode_message(
            TxType::WithdrawNft,
            alice,
            0,
            4,
            0,
            &nft_id.to_be_bytes(),
        );
        let err = m
            .apply(Operation::WithdrawNft {
                account_id: alice,
                nft_id,
                amount: 4,
                signature: auth::sign(&sk, &msg),
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidAmount(_)));
    }

    #[test]
    fn test_erc721_mint_amount_enforced() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 0, "1000");
        bind_key(&mut m, alice, &sk);
        let err = mint_err(&mut m, &sk, alice, alice, ErcProtocol::Erc721, 2, [0xEE; 32]);
        assert!(matches!(err, KernelError::InvalidNftAmount { .. }));
    }

    #[test]
    fn test_full_exit_spares_frozen() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 2, "10000");
        bind_key(&mut m, alice, &sk);
        place(&mut m, &sk, alice, AssetPair::new(1, 2), Side::Buy, "100", "50");

        let infos = m
            .apply(Operation::FullExit {
                chain_id: 1,
                priority_id: 1,
                operator: OPERATOR,
                account_id: alice,
                token_id: 2,
            })
            .unwrap();
        assert!(matches!(
            infos[0].special_info,
            SpecialInfo::Exit { amount } if amount == to_fixed("5000").unwrap()
        ));
        // The open-order commitment survives the exit
        assert_eq!(m.tree().token_balance(alice, 2).unwrap(), to_fixed("5000").unwrap());
        assert_eq!(m.tree().frozen_balance(alice, 2).unwrap(), to_fixed("5000").unwrap());
    }

    fn place(
        m: &mut StateMachine<MemoryKv>,
        sk: &SigningKey,
        account_id: AccountId,
        pair: AssetPair,
        side: Side,
        price: &str,
        quantity: &str,
    ) -> Vec<OperationInfo> {
        let mut aux = Vec::new();
        aux.extend_from_slice(&pair.left.to_be_bytes());
        aux.extend_from_slice(&pair.right.to_be_bytes());
        aux.push(side.to_u8());
        aux.extend_from_slice(&to_fixed(price).unwrap().to_be_bytes());
        let msg = auth::encode_message(
            TxType::PlaceOrder,
            account_id,
            pair.left,
            to_fixed(quantity).unwrap(),
            0,
            &aux,
        );
        m.apply(Operation::PlaceOrder {
            account_id,
            pair,
            side,
            price: price.to_string(),
            quantity: quantity.to_string(),
            signature: auth::sign(sk, &msg),
        })
        .unwrap()
    }

    #[test]
    fn test_malformed_order_counter_rejected_as_corrupt() {
        let mut m = machine();
        let sk = keypair(1);
        let alice = deposit(&mut m, 0, 7, 1, "100");
        bind_key(&mut m, alice, &sk);

        // Truncated counter bytes must surface, not restart allocation
        m.tree
            .store_mut()
            .put(meta_key(NEXT_ORDER_META), vec![0xFF; 3]);
        m.tree.store_mut().commit();

        let pair = AssetPair::new(1, 2);
        let mut aux = Vec::new();
        aux.extend_from_slice(&pair.left.to_be_bytes());
        aux.extend_from_slice(&pair.right.to_be_bytes());
        aux.push(Side::Sell.to_u8());
        aux.extend_from_slice(&to_fixed("100").unwrap().to_be_bytes());
        let msg = auth::encode_message(
            TxType::PlaceOrder,
            alice,
            pair.left,
            to_fixed("10").unwrap(),
            0,
            &aux,
        );
        let err = m
            .apply(Operation::PlaceOrder {
                account_id: alice,
                pair,
                side: Side::Sell,
                price: "100".to_string(),
                quantity: "10".to_string(),
                signature: auth::sign(&sk, &msg),
            })
            .unwrap_err();
        assert_eq!(err, KernelError::Corrupt(prefix::META));
    }

    #[allow(clippy::too_many_arguments)]
    fn mint_op(
        sk: &SigningKey,
        creator: AccountId,
        recipient: AccountId,
        protocol: ErcProtocol,
        mint_amount: Amount,
        content_hash: Hash,
    ) -> Operation {
        let mut aux = Vec::new();
        aux.extend_from_slice(&recipient.to_be_bytes());
        aux.extend_from_slice(&protocol.to_u16().to_be_bytes());
        aux.extend_from_slice(&content_hash);
        let msg = auth::encode_message(TxType::MintNft, creator, 0, mint_amount, 0, &aux);
        Operation::MintNft {
            creator_account_id: creator,
            recipient_account_id: recipient,
            erc_protocol: protocol,
            amount: mint_amount,
            content_hash,
            signature: auth::sign(sk, &msg),
        }
    }

    fn mint(
        m: &mut StateMachine<MemoryKv>,
        sk: &SigningKey,
        creator: AccountId,
        recipient: AccountId,
        protocol: ErcProtocol,
        mint_amount: Amount,
        content_hash: Hash,
    ) -> Vec<OperationInfo> {
        m.apply(mint_op(sk, creator, recipient, protocol, mint_amount, content_hash))
            .unwrap()
    }

    fn mint_err(
        m: &mut StateMachine<MemoryKv>,
        sk: &SigningKey,
        creator: AccountId,
        recipient: AccountId,
        protocol: ErcProtocol,
        mint_amount: Amount,
        content_hash: Hash,
    ) -> KernelError {
        m.apply(mint_op(sk, creator, recipient, protocol, mint_amount, content_hash))
            .unwrap_err()
    }
}
