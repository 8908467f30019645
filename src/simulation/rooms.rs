//! Grid rooms domain.
//!
//! A gridworld partitioned into rooms; the abstract observation is the room
//! the agent currently occupies, which makes the domain a natural target
//! for macro-actions ("go to room r"). Reaching the goal cell ends the
//! episode.

use rand::rngs::StdRng;
use rand::Rng;

use crate::planning::history::History;
use crate::simulation::simulator::{Simulator, SimulatorFlags, StepOutcome};

pub const REWARD_STEP: f64 = -1.0;
pub const REWARD_GOAL: f64 = 10.0;
pub const DISCOUNT: f64 = 0.95;

/// Classic four-rooms layout; the goal lives in room 0 (top right).
const FOUR_ROOMS_MAP: &str = "\
#############
#11111#00000#
#11111#00000#
#11111000000#
#11111#00000#
#11111#00000#
###2#####3###
#22222#33333#
#22222#33333#
#22222333333#
#22222#33333#
#22222#33333#
#############";

const FOUR_ROOMS_GOAL: (usize, usize) = (10, 2);

/// Minimal two-rooms layout for deterministic tests.
const TWO_ROOMS_MAP: &str = "\
#######
#11#00#
#11000#
#11#00#
#######";

const TWO_ROOMS_GOAL: (usize, usize) = (5, 1);

/// Movement deltas: north, east, south, west.
const MOVES: [(isize, isize); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Agent position on the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RoomsState {
    pub x: usize,
    pub y: usize,
}

/// The rooms gridworld.
#[derive(Clone, Debug)]
pub struct Rooms {
    width: usize,
    height: usize,
    /// Room id per cell; `None` marks a wall.
    cells: Vec<Option<u8>>,
    num_rooms: usize,
    goal: (usize, usize),
    noise: f64,
    state_abstraction: bool,
}

impl Rooms {
    /// Parses a map where `#` is a wall and a digit assigns the cell to a
    /// room.
    ///
    /// # Panics
    ///
    /// Panics on ragged maps, non-digit cells or a goal placed on a wall;
    /// maps are compiled-in constants.
    #[must_use]
    pub fn parse(map: &str, goal: (usize, usize), noise: f64) -> Self {
        let lines: Vec<&str> = map.lines().collect();
        let height = lines.len();
        let width = lines[0].len();

        let mut cells = Vec::with_capacity(width * height);
        let mut num_rooms = 0usize;
        for line in &lines {
            assert_eq!(line.len(), width, "ragged map");
            for symbol in line.chars() {
                if symbol == '#' {
                    cells.push(None);
                } else {
                    let room = symbol.to_digit(10).expect("cells are walls or room digits") as u8;
                    num_rooms = num_rooms.max(room as usize + 1);
                    cells.push(Some(room));
                }
            }
        }

        let rooms = Self {
            width,
            height,
            cells,
            num_rooms,
            goal,
            noise,
            state_abstraction: false,
        };
        assert!(rooms.room(goal.0, goal.1).is_some(), "goal on a wall");
        rooms
    }

    /// The four-rooms benchmark map.
    #[must_use]
    pub fn four_rooms(noise: f64) -> Self {
        Self::parse(FOUR_ROOMS_MAP, FOUR_ROOMS_GOAL, noise)
    }

    /// A small two-rooms map, handy for deterministic tests.
    #[must_use]
    pub fn two_rooms(noise: f64) -> Self {
        Self::parse(TWO_ROOMS_MAP, TWO_ROOMS_GOAL, noise)
    }

    /// Enables whole-history belief fingerprints.
    #[must_use]
    pub fn with_state_abstraction(mut self) -> Self {
        self.state_abstraction = true;
        self
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn goal(&self) -> (usize, usize) {
        self.goal
    }

    /// Room id of a cell, or `None` for walls and out-of-bounds positions.
    #[must_use]
    pub fn room(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[y * self.width + x]
    }

    #[must_use]
    pub fn is_wall(&self, x: usize, y: usize) -> bool {
        self.room(x, y).is_none()
    }

    fn free_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.height)
            .flat_map(move |y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| !self.is_wall(x, y))
    }
}

impl Simulator for Rooms {
    type State = RoomsState;

    fn num_actions(&self) -> usize {
        MOVES.len()
    }

    fn num_observations(&self) -> usize {
        self.num_rooms
    }

    fn discount(&self) -> f64 {
        DISCOUNT
    }

    fn reward_range(&self) -> f64 {
        REWARD_GOAL - REWARD_STEP
    }

    fn flags(&self) -> SimulatorFlags {
        SimulatorFlags {
            action_abstraction: true,
            state_abstraction: self.state_abstraction,
            fully_observable: true,
            hierarchical_planning: true,
        }
    }

    fn create_start_state(&self, rng: &mut StdRng) -> RoomsState {
        let candidates: Vec<(usize, usize)> =
            self.free_cells().filter(|&cell| cell != self.goal).collect();
        let (x, y) = candidates[rng.random_range(0..candidates.len())];
        RoomsState { x, y }
    }

    fn step(&self, state: &mut RoomsState, action: usize, rng: &mut StdRng) -> StepOutcome {
        assert!(action < MOVES.len(), "action out of range");

        let actual = if self.noise > 0.0 && rng.random_bool(self.noise) {
            rng.random_range(0..MOVES.len())
        } else {
            action
        };

        let (dx, dy) = MOVES[actual];
        let nx = state.x.checked_add_signed(dx);
        let ny = state.y.checked_add_signed(dy);
        if let (Some(nx), Some(ny)) = (nx, ny) {
            if !self.is_wall(nx, ny) {
                state.x = nx;
                state.y = ny;
            }
        }

        let observation = usize::from(self.room(state.x, state.y).expect("agent on a free cell"));
        if (state.x, state.y) == self.goal {
            StepOutcome {
                observation,
                reward: REWARD_GOAL,
                terminal: true,
            }
        } else {
            StepOutcome {
                observation,
                reward: REWARD_STEP,
                terminal: false,
            }
        }
    }

    fn abstraction(&self, state: &RoomsState) -> usize {
        usize::from(self.room(state.x, state.y).expect("agent on a free cell"))
    }

    fn validate(&self, state: &RoomsState) {
        assert!(
            !self.is_wall(state.x, state.y),
            "agent at ({}, {}) is inside a wall",
            state.x,
            state.y
        );
    }

    fn local_move(
        &self,
        state: &mut RoomsState,
        _history: &History,
        step_observation: usize,
        rng: &mut StdRng,
    ) -> bool {
        // Teleport within the observed room; anywhere else would contradict
        // the last observation
        let room = step_observation as u8;
        let candidates: Vec<(usize, usize)> = self
            .free_cells()
            .filter(|&(x, y)| self.cells[y * self.width + x] == Some(room) && (x, y) != self.goal)
            .collect();
        if candidates.is_empty() {
            return false;
        }

        let (x, y) = candidates[rng.random_range(0..candidates.len())];
        state.x = x;
        state.y = y;
        true
    }
}
