use std::borrow::Borrow;
use std::hash::Hash;

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};
use hashbrown::HashMap;

/// Assigns dense ids to keys in insertion order.
///
/// Only the keys are serialized; the lookup table is rebuilt on decoding.
#[derive(Clone, Debug)]
pub struct Indexer<K> {
    ids: HashMap<K, usize>,
    keys: Vec<K>,
}

impl<K> Indexer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            keys: vec![],
        }
    }

    pub fn get_id<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + ToOwned<Owned = K> + Eq + Hash,
    {
        if let Some(&id) = self.ids.get(key) {
            id
        } else {
            let id = self.keys.len();
            self.keys.push(key.to_owned());
            self.ids.insert(key.to_owned(), id);
            id
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    fn from_keys(keys: Vec<K>) -> Result<Self, DecodeError> {
        let mut ids = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            if ids.insert(key.clone(), i).is_some() {
                return Err(DecodeError::OtherString(format!(
                    "duplicated key at index {i}"
                )));
            }
        }
        Ok(Self { ids, keys })
    }
}

impl<K> Default for Indexer<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Encode for Indexer<K>
where
    K: Encode + 'static,
{
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.keys, encoder)
    }
}

impl<K> Decode for Indexer<K>
where
    K: Decode + Eq + Hash + Clone + 'static,
{
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let keys: Vec<K> = Decode::decode(decoder)?;
        Self::from_keys(keys)
    }
}

impl<'de, K> BorrowDecode<'de> for Indexer<K>
where
    K: Decode + Eq + Hash + Clone + 'static,
{
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

/// Computes `log(Σ exp(x))` without overflow.
///
/// Returns negative infinity for an empty input.
#[inline]
pub fn log_sum_exp<I>(xs: I) -> f64
where
    I: IntoIterator<Item = f64> + Clone,
{
    let max = xs.clone().into_iter().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    if !max.is_finite() {
        return max;
    }
    max + xs.into_iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Euclidean norm of a slice.
#[inline]
pub fn l2_norm(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum::<f64>().sqrt()
}
