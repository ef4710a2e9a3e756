// src/services/offer_registry.rs
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::time::Instant;

use crate::models::{OfferView, ReservationId, TripOffer};

/// Offers held by the driver, newest first.
///
/// Ids stay in the dedup set after the offer leaves the registry (accepted,
/// expired) and are only forgotten on rejection, race loss or cancellation.
/// Expiry is a min-heap of instants; entries for offers removed by other
/// paths are skipped when they surface.
#[derive(Debug, Default)]
pub struct OfferRegistry {
    offers: VecDeque<TripOffer>,
    seen: HashSet<ReservationId>,
    expiry: BinaryHeap<Reverse<(Instant, ReservationId)>>,
}

impl OfferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_seen(&self, id: &ReservationId) -> bool {
        self.seen.contains(id)
    }

    /// Insert at the head. Returns false when the id was already processed.
    pub fn insert(&mut self, offer: TripOffer) -> bool {
        if !self.seen.insert(offer.id.clone()) {
            return false;
        }
        self.expiry.push(Reverse((offer.expires_at, offer.id.clone())));
        self.offers.push_front(offer);
        true
    }

    /// Remove the offer but keep its id in the dedup set.
    pub fn remove(&mut self, id: &ReservationId) -> Option<TripOffer> {
        let index = self.offers.iter().position(|offer| &offer.id == id)?;
        self.offers.remove(index)
    }

    /// Clear the dedup entry so the id can be offered again.
    pub fn forget(&mut self, id: &ReservationId) -> bool {
        self.seen.remove(id)
    }

    pub fn get(&self, id: &ReservationId) -> Option<&TripOffer> {
        self.offers.iter().find(|offer| &offer.id == id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut TripOffer> {
        self.offers.iter_mut().find(|offer| &offer.id == id)
    }

    pub fn contains(&self, id: &ReservationId) -> bool {
        self.get(id).is_some()
    }

    /// Drop every offer whose countdown reached zero and return them.
    pub fn expire(&mut self, now: Instant) -> Vec<TripOffer> {
        let mut expired = Vec::new();

        while self
            .expiry
            .peek()
            .is_some_and(|Reverse((expires_at, _))| *expires_at <= now)
        {
            let Some(Reverse((expires_at, id))) = self.expiry.pop() else {
                break;
            };
            // Stale entry: the offer left by another path or was re-offered.
            let current = self.get(&id).is_some_and(|offer| offer.expires_at == expires_at);
            if current {
                if let Some(offer) = self.remove(&id) {
                    expired.push(offer);
                }
            }
        }

        expired
    }

    pub fn views(&self, now: Instant) -> Vec<OfferView> {
        self.offers
            .iter()
            .map(|offer| OfferView {
                expires_in: offer.expires_in(now),
                offer: offer.clone(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TripOffer> {
        self.offers.iter()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn clear(&mut self) {
        self.offers.clear();
        self.seen.clear();
        self.expiry.clear();
    }
}
