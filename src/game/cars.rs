//! Relay-side car registry: ownership, seats and the per-owner cap

use std::collections::HashMap;

use uuid::Uuid;

use super::combat::RejectReason;
use crate::sim::math::Vec3;
use crate::sim::tuning::SEAT_COUNT;
use crate::ws::protocol::CarInfo;

const MAX_CAR_ID_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct CarRecord {
    pub car_id: String,
    pub owner_id: Uuid,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub steering_angle: f32,
    pub seats: [Option<Uuid>; SEAT_COUNT],
    /// Spawn order, oldest first
    spawn_seq: u64,
}

impl CarRecord {
    pub fn info(&self) -> CarInfo {
        CarInfo {
            car_id: self.car_id.clone(),
            owner_id: self.owner_id,
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            seats: self.seats,
        }
    }

    pub fn driver(&self) -> Option<Uuid> {
        self.seats[0]
    }

    pub fn is_occupied(&self) -> bool {
        self.seats.iter().any(Option::is_some)
    }

    /// Seat 0's occupant drives; an empty car can be moved by its owner
    pub fn can_drive(&self, player_id: Uuid) -> bool {
        match self.driver() {
            Some(driver) => driver == player_id,
            None => self.owner_id == player_id,
        }
    }
}

/// A seat freed by an exit or eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreedSeat {
    pub car_id: String,
    pub seat_index: usize,
}

#[derive(Debug, Default)]
pub struct CarRegistry {
    cars: HashMap<String, CarRecord>,
    next_seq: u64,
}

impl CarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    pub fn get(&self, car_id: &str) -> Option<&CarRecord> {
        self.cars.get(car_id)
    }

    /// All cars, oldest first
    pub fn infos(&self) -> Vec<CarInfo> {
        let mut cars: Vec<&CarRecord> = self.cars.values().collect();
        cars.sort_by_key(|c| c.spawn_seq);
        cars.into_iter().map(CarRecord::info).collect()
    }

    /// Register a new car. When the owner is at `cap`, their oldest empty car
    /// makes room; its id is returned for removal broadcasts.
    pub fn spawn(
        &mut self,
        car_id: String,
        owner_id: Uuid,
        position: Vec3,
        rotation: Vec3,
        cap: usize,
    ) -> Result<(CarInfo, Vec<String>), RejectReason> {
        if car_id.is_empty() || car_id.chars().count() > MAX_CAR_ID_CHARS {
            return Err(RejectReason::Implausible);
        }
        if !(position.is_finite() && rotation.is_finite()) {
            return Err(RejectReason::Implausible);
        }
        if self.cars.contains_key(&car_id) {
            return Err(RejectReason::DuplicateCar);
        }

        let mut removed = Vec::new();
        while self.owned_by(owner_id).len() >= cap.max(1) {
            let oldest_empty = self
                .owned_by(owner_id)
                .into_iter()
                .filter(|c| !c.is_occupied())
                .min_by_key(|c| c.spawn_seq)
                .map(|c| c.car_id.clone());
            match oldest_empty {
                Some(id) => {
                    self.cars.remove(&id);
                    removed.push(id);
                }
                None => return Err(RejectReason::CarLimit),
            }
        }

        let record = CarRecord {
            car_id: car_id.clone(),
            owner_id,
            position,
            rotation,
            velocity: Vec3::ZERO,
            steering_angle: 0.0,
            seats: [None; SEAT_COUNT],
            spawn_seq: self.next_seq,
        };
        self.next_seq += 1;
        let info = record.info();
        self.cars.insert(car_id, record);
        Ok((info, removed))
    }

    fn owned_by(&self, owner_id: Uuid) -> Vec<&CarRecord> {
        self.cars.values().filter(|c| c.owner_id == owner_id).collect()
    }

    /// Transform update from the car's driver
    pub fn update(
        &mut self,
        car_id: &str,
        player_id: Uuid,
        position: Vec3,
        rotation: Vec3,
        velocity: Vec3,
        steering_angle: f32,
    ) -> Result<(), RejectReason> {
        let car = self.cars.get_mut(car_id).ok_or(RejectReason::UnknownCar)?;
        if !car.can_drive(player_id) {
            return Err(RejectReason::NotDriver);
        }
        if !(position.is_finite() && rotation.is_finite() && velocity.is_finite() && steering_angle.is_finite()) {
            return Err(RejectReason::Implausible);
        }
        car.position = position;
        car.rotation = rotation;
        car.velocity = velocity;
        car.steering_angle = steering_angle;
        Ok(())
    }

    /// The car and seat a player occupies
    pub fn seat_of(&self, player_id: Uuid) -> Option<(String, usize)> {
        self.cars.values().find_map(|car| {
            car.seats
                .iter()
                .position(|s| *s == Some(player_id))
                .map(|seat| (car.car_id.clone(), seat))
        })
    }

    pub fn enter(&mut self, car_id: &str, player_id: Uuid, seat_index: usize) -> Result<(), RejectReason> {
        if self.seat_of(player_id).is_some() {
            return Err(RejectReason::AlreadySeated);
        }
        let car = self.cars.get_mut(car_id).ok_or(RejectReason::UnknownCar)?;
        let seat = car.seats.get_mut(seat_index).ok_or(RejectReason::InvalidSeat)?;
        if seat.is_some() {
            return Err(RejectReason::SeatTaken);
        }
        *seat = Some(player_id);
        Ok(())
    }

    pub fn exit(&mut self, car_id: &str, player_id: Uuid) -> Result<usize, RejectReason> {
        let car = self.cars.get_mut(car_id).ok_or(RejectReason::UnknownCar)?;
        let seat_index = car
            .seats
            .iter()
            .position(|s| *s == Some(player_id))
            .ok_or(RejectReason::NotSeated)?;
        car.seats[seat_index] = None;
        Ok(seat_index)
    }

    /// Free every seat the player holds
    pub fn evict(&mut self, player_id: Uuid) -> Vec<FreedSeat> {
        let mut freed = Vec::new();
        for car in self.cars.values_mut() {
            for (seat_index, seat) in car.seats.iter_mut().enumerate() {
                if *seat == Some(player_id) {
                    *seat = None;
                    freed.push(FreedSeat {
                        car_id: car.car_id.clone(),
                        seat_index,
                    });
                }
            }
        }
        freed
    }

    /// Remove the owner's cars nobody is sitting in
    pub fn remove_abandoned(&mut self, owner_id: Uuid) -> Vec<String> {
        let ids: Vec<String> = self
            .cars
            .values()
            .filter(|c| c.owner_id == owner_id && !c.is_occupied())
            .map(|c| c.car_id.clone())
            .collect();
        for id in &ids {
            self.cars.remove(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(reg: &mut CarRegistry, id: &str, owner: Uuid, cap: usize) -> Result<(CarInfo, Vec<String>), RejectReason> {
        reg.spawn(id.to_string(), owner, Vec3::ZERO, Vec3::ZERO, cap)
    }

    #[test]
    fn seats_hold_one_player_each() {
        let owner = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let mut reg = CarRegistry::new();
        spawn(&mut reg, "car-1", owner, 3).unwrap();

        reg.enter("car-1", owner, 0).unwrap();
        assert_eq!(reg.enter("car-1", rider, 0), Err(RejectReason::SeatTaken));
        assert_eq!(reg.enter("car-1", rider, 4), Err(RejectReason::InvalidSeat));
        reg.enter("car-1", rider, 2).unwrap();
        assert_eq!(reg.enter("car-1", rider, 3), Err(RejectReason::AlreadySeated));

        assert_eq!(reg.seat_of(rider), Some(("car-1".to_string(), 2)));
        assert_eq!(reg.exit("car-1", rider), Ok(2));
        assert_eq!(reg.exit("car-1", rider), Err(RejectReason::NotSeated));
    }

    #[test]
    fn only_driver_or_idle_owner_updates() {
        let owner = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let mut reg = CarRegistry::new();
        spawn(&mut reg, "c", owner, 3).unwrap();
        let at = Vec3::new(1.0, 0.0, 0.0);

        assert!(reg.update("c", owner, at, Vec3::ZERO, Vec3::ZERO, 0.0).is_ok());
        assert_eq!(reg.update("c", driver, at, Vec3::ZERO, Vec3::ZERO, 0.0), Err(RejectReason::NotDriver));

        reg.enter("c", driver, 0).unwrap();
        assert!(reg.update("c", driver, at, Vec3::ZERO, Vec3::ZERO, 0.1).is_ok());
        assert_eq!(reg.update("c", owner, at, Vec3::ZERO, Vec3::ZERO, 0.0), Err(RejectReason::NotDriver));
    }

    #[test]
    fn cap_replaces_oldest_empty_car() {
        let owner = Uuid::new_v4();
        let mut reg = CarRegistry::new();
        spawn(&mut reg, "a", owner, 2).unwrap();
        spawn(&mut reg, "b", owner, 2).unwrap();
        let (_, removed) = spawn(&mut reg, "c", owner, 2).unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert_eq!(reg.len(), 2);

        // Occupied cars are never reclaimed
        reg.enter("b", owner, 0).unwrap();
        reg.enter("c", Uuid::new_v4(), 0).unwrap();
        assert_eq!(spawn(&mut reg, "d", owner, 2), Err(RejectReason::CarLimit));
    }

    #[test]
    fn duplicate_and_bad_ids_rejected() {
        let owner = Uuid::new_v4();
        let mut reg = CarRegistry::new();
        spawn(&mut reg, "x", owner, 3).unwrap();
        assert_eq!(spawn(&mut reg, "x", owner, 3), Err(RejectReason::DuplicateCar));
        assert_eq!(spawn(&mut reg, "", owner, 3), Err(RejectReason::Implausible));
    }

    #[test]
    fn disconnect_evicts_and_removes_abandoned() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut reg = CarRegistry::new();
        spawn(&mut reg, "mine", owner, 3).unwrap();
        spawn(&mut reg, "shared", owner, 3).unwrap();
        reg.enter("mine", owner, 0).unwrap();
        reg.enter("shared", other, 1).unwrap();

        let freed = reg.evict(owner);
        assert_eq!(
            freed,
            vec![FreedSeat {
                car_id: "mine".to_string(),
                seat_index: 0
            }]
        );
        assert_eq!(reg.remove_abandoned(owner), vec!["mine".to_string()]);
        assert!(reg.get("shared").is_some());
    }
}
