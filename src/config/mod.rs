//! Configuration module - environment variable parsing and simulation constants

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use glam::Vec2;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase connection, if configured. Without it games are kept in memory.
    pub supabase: Option<SupabaseConfig>,

    /// Allowed client origins for CORS
    pub client_origin: String,

    /// Number of tables to open at startup
    pub table_count: usize,
    /// Rows returned by the leaderboard
    pub leaderboard_top_n: usize,

    /// Simulation constants shared by every table
    pub sim: SimConfig,
}

/// Credentials for the Supabase REST backend
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),

            table_count: parse_or("TABLE_COUNT", 1)?,
            leaderboard_top_n: parse_or("LEADERBOARD_TOP_N", 100)?,

            sim: SimConfig::default(),
        })
    }
}

fn parse_or(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Simulation constants.
///
/// Two unit systems are in play. *Simulation units* are what the physics
/// engine integrates in (the table is roughly 265 x 190 of them). *Display
/// metres* are what render and input collaborators speak. `sim_to_display`
/// is the only bridge between the two.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Display metres per simulation unit
    pub sim_to_display: f32,
    /// Ball radius in simulation units
    pub ball_radius: f32,
    /// Ball mass (impulse / mass = velocity change)
    pub ball_mass: f32,
    /// Ball-ball and ball-rail restitution
    pub restitution: f32,
    /// Exponential velocity damping, per second
    pub linear_damping: f32,
    /// Constant felt deceleration, simulation units per second squared
    pub rolling_deceleration: f32,
    /// Cue velocity (sim units/s) per unit of direction x pull metres
    pub impulse_scale: f32,
    /// Furthest a shooter may stand from the cue ball, display metres
    pub max_reach: f32,
    /// Every body slower than this (sim units/s) means the table has settled
    pub settle_epsilon: f32,
    /// Looser threshold used to timestamp the end of a turn
    pub near_settle_epsilon: f32,
    /// Observation ticks per second
    pub observation_hz: u32,
    /// Physics sub-steps per second
    pub physics_hz: u32,
    /// Delay between a ball leaving play and its body leaving the world
    pub removal_delay: Duration,
    /// Distance from the cue ball to the cue tip at rest during replay, display metres
    pub replay_cue_offset: f32,
    /// Cue stick keyframe times during replay, seconds
    pub cue_keyframes: [f32; 4],
    /// Time from the start of a replay step until the recorded shot is applied
    pub cue_strike_delay: Duration,
    /// Cue ball spawn and reset position, simulation units
    pub cue_start: Vec2,
    /// Apex of the object ball rack, simulation units
    pub rack_apex: Vec2,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sim_to_display: 0.01,
            ball_radius: 3.0,
            ball_mass: 1.0,
            restitution: 0.92,
            linear_damping: 0.6,
            rolling_deceleration: 25.0,
            impulse_scale: 1000.0,
            max_reach: 1.2,
            settle_epsilon: 0.0001,
            near_settle_epsilon: 0.005,
            observation_hz: 30,
            physics_hz: 180,
            removal_delay: Duration::from_millis(100),
            replay_cue_offset: 0.9,
            cue_keyframes: [0.0, 0.1, 1.0, 1.1],
            cue_strike_delay: Duration::from_millis(1110),
            cue_start: Vec2::new(70.0, 0.0),
            rack_apex: Vec2::ZERO,
        }
    }
}

impl SimConfig {
    /// Fixed physics sub-step, seconds
    pub fn physics_dt(&self) -> f32 {
        1.0 / self.physics_hz as f32
    }

    pub fn physics_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.physics_hz as u64)
    }

    pub fn observation_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.observation_hz as u64)
    }

    /// Convert a simulation-space point to display metres
    pub fn to_display(&self, sim: Vec2) -> Vec2 {
        sim * self.sim_to_display
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
