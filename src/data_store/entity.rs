use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_store::resource_key::{ResourceKey, TableKind};

/// A flight with a fixed number of seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub flight_num: String,
    pub num_seats: i64,
    pub num_avail: i64,
    pub price: i64,
}

/// Rooms offered at one hotel location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub location: String,
    pub num_rooms: i64,
    pub num_avail: i64,
    pub price: i64,
}

/// Rental cars offered at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub location: String,
    pub num_cars: i64,
    pub num_avail: i64,
    pub price: i64,
}

/// Which inventory table a reservation points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationKind {
    Flight,
    Room,
    Car,
}

impl ReservationKind {
    /// Key of the inventory row a reservation of this kind refers to.
    pub fn resource_key(self, resource_id: &str) -> ResourceKey {
        match self {
            ReservationKind::Flight => ResourceKey::flight(resource_id),
            ReservationKind::Room => ResourceKey::hotel(resource_id),
            ReservationKind::Car => ResourceKey::car(resource_id),
        }
    }
}

/// One reserved unit: a seat, a room, or a car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub kind: ReservationKind,
    /// Flight number or location of the reserved row.
    pub resource_id: String,
}

impl Reservation {
    pub fn new(kind: ReservationKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
        }
    }

    pub fn resource_key(&self) -> ResourceKey {
        self.kind.resource_key(&self.resource_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub reservations: Vec<Reservation>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reservations: Vec::new(),
        }
    }

    /// Whether any reservation of `kind` points at `resource_id`.
    pub fn holds(&self, kind: ReservationKind, resource_id: &str) -> bool {
        self.reservations
            .iter()
            .any(|r| r.kind == kind && r.resource_id == resource_id)
    }
}

/// A row of any of the four tables.
///
/// Rows placed into a committed snapshot are never mutated; a transaction
/// that changes one stages a fresh copy in its workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row {
    Flight(Flight),
    Hotel(Hotel),
    Car(Car),
    Customer(Customer),
}

impl Row {
    /// Identifier of the row within its table.
    pub fn id(&self) -> &str {
        match self {
            Row::Flight(f) => &f.flight_num,
            Row::Hotel(h) => &h.location,
            Row::Car(c) => &c.location,
            Row::Customer(c) => &c.name,
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            Row::Flight(_) => TableKind::Flights,
            Row::Hotel(_) => TableKind::Hotels,
            Row::Car(_) => TableKind::Cars,
            Row::Customer(_) => TableKind::Customers,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.id())
    }

    pub fn as_customer(&self) -> Option<&Customer> {
        match self {
            Row::Customer(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Row::Flight(fl) => write!(
                f,
                "Flight {}: seats={} avail={} price={}",
                fl.flight_num, fl.num_seats, fl.num_avail, fl.price
            ),
            Row::Hotel(h) => write!(
                f,
                "Hotel {}: rooms={} avail={} price={}",
                h.location, h.num_rooms, h.num_avail, h.price
            ),
            Row::Car(c) => write!(
                f,
                "Car {}: cars={} avail={} price={}",
                c.location, c.num_cars, c.num_avail, c.price
            ),
            Row::Customer(c) => {
                write!(f, "Customer {}: {} reservations", c.name, c.reservations.len())?;
                for r in &c.reservations {
                    write!(f, " [{:?} {}]", r.kind, r.resource_id)?;
                }
                Ok(())
            }
        }
    }
}

/// Common shape of the three bookable tables.
///
/// Every inventory row counts a total and an available quantity and carries a
/// unit price; the resource manager adjusts all three kinds through this
/// trait instead of one hand-written path per table.
pub trait Inventory: Clone + Sized {
    /// Table this row type lives in.
    const TABLE: TableKind;
    /// Reservation kind that points at rows of this type.
    const RESERVATION: ReservationKind;

    /// An empty row: zero units, zero price.
    fn fresh(id: &str) -> Self;
    fn from_row(row: &Row) -> Option<&Self>;
    fn into_row(self) -> Row;

    fn total(&self) -> i64;
    fn available(&self) -> i64;
    fn price(&self) -> i64;

    fn set_total(&mut self, total: i64);
    fn set_available(&mut self, available: i64);
    fn set_price(&mut self, price: i64);

    /// Applies the price argument of an add operation. A non-positive price
    /// leaves the current price untouched.
    fn apply_price(&mut self, price: i64) {
        if price > 0 {
            self.set_price(price);
        }
    }
}

impl Inventory for Flight {
    const TABLE: TableKind = TableKind::Flights;
    const RESERVATION: ReservationKind = ReservationKind::Flight;

    fn fresh(id: &str) -> Self {
        Flight {
            flight_num: id.to_string(),
            num_seats: 0,
            num_avail: 0,
            price: 0,
        }
    }

    fn from_row(row: &Row) -> Option<&Self> {
        match row {
            Row::Flight(f) => Some(f),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::Flight(self)
    }

    fn total(&self) -> i64 {
        self.num_seats
    }

    fn available(&self) -> i64 {
        self.num_avail
    }

    fn price(&self) -> i64 {
        self.price
    }

    fn set_total(&mut self, total: i64) {
        self.num_seats = total;
    }

    fn set_available(&mut self, available: i64) {
        self.num_avail = available;
    }

    fn set_price(&mut self, price: i64) {
        self.price = price;
    }
}

impl Inventory for Hotel {
    const TABLE: TableKind = TableKind::Hotels;
    const RESERVATION: ReservationKind = ReservationKind::Room;

    fn fresh(id: &str) -> Self {
        Hotel {
            location: id.to_string(),
            num_rooms: 0,
            num_avail: 0,
            price: 0,
        }
    }

    fn from_row(row: &Row) -> Option<&Self> {
        match row {
            Row::Hotel(h) => Some(h),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::Hotel(self)
    }

    fn total(&self) -> i64 {
        self.num_rooms
    }

    fn available(&self) -> i64 {
        self.num_avail
    }

    fn price(&self) -> i64 {
        self.price
    }

    fn set_total(&mut self, total: i64) {
        self.num_rooms = total;
    }

    fn set_available(&mut self, available: i64) {
        self.num_avail = available;
    }

    fn set_price(&mut self, price: i64) {
        self.price = price;
    }
}

impl Inventory for Car {
    const TABLE: TableKind = TableKind::Cars;
    const RESERVATION: ReservationKind = ReservationKind::Car;

    fn fresh(id: &str) -> Self {
        Car {
            location: id.to_string(),
            num_cars: 0,
            num_avail: 0,
            price: 0,
        }
    }

    fn from_row(row: &Row) -> Option<&Self> {
        match row {
            Row::Car(c) => Some(c),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::Car(self)
    }

    fn total(&self) -> i64 {
        self.num_cars
    }

    fn available(&self) -> i64 {
        self.num_avail
    }

    fn price(&self) -> i64 {
        self.price
    }

    fn set_total(&mut self, total: i64) {
        self.num_cars = total;
    }

    fn set_available(&mut self, available: i64) {
        self.num_avail = available;
    }

    fn set_price(&mut self, price: i64) {
        self.price = price;
    }
}
