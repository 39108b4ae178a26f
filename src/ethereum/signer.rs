use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxKind},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use std::{fmt, str::FromStr};
use tracing::debug;

use super::{error::SignerError, GasPricing, UnsignedTransaction};

/// Signing capability used by the transactor. Implementations own the keys;
/// the runtime only asks whether a sender is known and hands over a fully
/// resolved transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn has_key(&self, address: Address) -> bool;

    /// Sign and return the EIP-2718 encoded transaction.
    async fn sign_transaction(&self, tx: UnsignedTransaction) -> Result<Bytes, SignerError>;
}

/// Local private keys held in an alloy wallet.
#[derive(Clone, Default)]
pub struct Keyring {
    wallet: Option<EthereumWallet>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_private_key(private_key: &str) -> Result<Self, SignerError> {
        let mut keyring = Self::new();
        keyring.add_private_key(private_key)?;
        Ok(keyring)
    }

    /// Register a hex private key (with or without `0x`) and return its address.
    pub fn add_private_key(&mut self, private_key: &str) -> Result<Address, SignerError> {
        let private_key = private_key.trim();
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);

        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = signer.address();

        match &mut self.wallet {
            Some(wallet) => wallet.register_signer(signer),
            None => self.wallet = Some(EthereumWallet::new(signer)),
        }
        debug!(%address, "registered signing key");
        Ok(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.wallet
            .as_ref()
            .map(|wallet| NetworkWallet::<Ethereum>::signer_addresses(wallet).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("addresses", &self.addresses())
            .finish()
    }
}

#[async_trait]
impl TransactionSigner for Keyring {
    fn has_key(&self, address: Address) -> bool {
        self.wallet
            .as_ref()
            .is_some_and(|wallet| NetworkWallet::<Ethereum>::has_signer_for(wallet, &address))
    }

    async fn sign_transaction(&self, tx: UnsignedTransaction) -> Result<Bytes, SignerError> {
        let wallet = self
            .wallet
            .as_ref()
            .filter(|_| self.has_key(tx.from))
            .ok_or(SignerError::UnknownKey(tx.from))?;

        let mut request = TransactionRequest::default()
            .with_from(tx.from)
            .with_input(tx.data)
            .with_value(tx.value)
            .with_nonce(tx.nonce)
            .with_chain_id(tx.chain_id)
            .with_gas_limit(tx.gas_limit);

        request.to = Some(tx.to.map_or(TxKind::Create, TxKind::Call));

        request = match tx.pricing {
            GasPricing::Legacy { gas_price } => request.with_gas_price(gas_price),
            GasPricing::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => request
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
        };

        let envelope = request
            .build(wallet)
            .await
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    /// First well-known development key.
    pub(crate) const DEV_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const DEV_ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn unsigned(pricing: GasPricing) -> UnsignedTransaction {
        UnsignedTransaction {
            from: DEV_ADDRESS,
            to: Some(Address::repeat_byte(0xaa)),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            value: U256::ZERO,
            nonce: 3,
            gas_limit: 60_000,
            chain_id: 31337,
            pricing,
        }
    }

    #[test]
    fn test_keyring_derives_address() {
        let keyring = Keyring::from_private_key(DEV_KEY).unwrap();
        assert!(keyring.has_key(DEV_ADDRESS));
        assert!(!keyring.has_key(Address::ZERO));
        assert_eq!(keyring.addresses(), vec![DEV_ADDRESS]);

        // the 0x prefix is optional
        let keyring = Keyring::from_private_key(DEV_KEY.trim_start_matches("0x")).unwrap();
        assert!(keyring.has_key(DEV_ADDRESS));
    }

    #[test]
    fn test_invalid_private_key() {
        let err = Keyring::from_private_key("0x1234").unwrap_err();
        assert!(matches!(err, SignerError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_sign_eip1559_and_legacy() {
        let keyring = Keyring::from_private_key(DEV_KEY).unwrap();

        let raw = keyring
            .sign_transaction(unsigned(GasPricing::Eip1559 {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            }))
            .await
            .unwrap();
        assert_eq!(raw[0], 0x02);

        // RFC 6979 signatures are deterministic
        let again = keyring
            .sign_transaction(unsigned(GasPricing::Eip1559 {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            }))
            .await
            .unwrap();
        assert_eq!(raw, again);

        let legacy = keyring
            .sign_transaction(unsigned(GasPricing::Legacy {
                gas_price: 20_000_000_000,
            }))
            .await
            .unwrap();
        assert!(legacy[0] >= 0xc0, "legacy transactions are a bare RLP list");
    }

    #[tokio::test]
    async fn test_sign_rejects_unknown_sender() {
        let keyring = Keyring::new();
        let err = keyring
            .sign_transaction(unsigned(GasPricing::Legacy { gas_price: 1 }))
            .await
            .unwrap_err();
        assert_eq!(err, SignerError::UnknownKey(DEV_ADDRESS));
    }
}
