use crate::model::{Direction, Participant, Room, SwipeKind, SwipeMap};
use std::collections::BTreeSet;

/// True when more than one participant is present and every one of them
/// has a latest swipe of right on `item_id`.
pub fn is_match(swipes: &SwipeMap, participants: &[Participant], item_id: &str) -> bool {
    if participants.len() < 2 {
        return false;
    }
    let right = participants
        .iter()
        .filter(|p| {
            swipes
                .get(&p.id)
                .and_then(|items| items.get(item_id))
                .copied()
                == Some(Direction::Right)
        })
        .count();
    right == participants.len()
}

/// All matched items of one kind. Restaurants come back in list order,
/// food types sorted.
pub fn find_matches(room: &Room, kind: SwipeKind) -> Vec<String> {
    let swipes = room.swipes(kind);
    match kind {
        SwipeKind::Restaurant => room
            .restaurants
            .iter()
            .filter(|r| is_match(swipes, &room.participants, &r.id))
            .map(|r| r.id.clone())
            .collect(),
        SwipeKind::FoodType => {
            let candidates: BTreeSet<&String> = swipes.values().flat_map(|m| m.keys()).collect();
            candidates
                .into_iter()
                .filter(|item| is_match(swipes, &room.participants, item))
                .cloned()
                .collect()
        }
    }
}
