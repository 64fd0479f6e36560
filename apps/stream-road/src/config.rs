use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;

use crate::session::CollisionPolicy;

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address every listener binds to.
    #[arg(long, env = "STREAM_ROAD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port of the producer-facing instance.
    #[arg(long, env = "STREAMER_PORT", default_value_t = 5000)]
    pub streamer_port: u16,

    /// Port of the consumer-facing instance.
    #[arg(long, env = "VIEWER_PORT", default_value_t = 5001)]
    pub viewer_port: u16,

    /// Port accepting GPS reports.
    #[arg(long, env = "GPS_INPUT_PORT", default_value_t = 5002)]
    pub gps_input_port: u16,

    /// Port serving GPS queries.
    #[arg(long, env = "GPS_OUTPUT_PORT", default_value_t = 5004)]
    pub gps_output_port: u16,

    /// Number of GPS samples retained.
    #[arg(long, env = "GPS_HISTORY_CAPACITY", default_value_t = 1000)]
    pub gps_history_capacity: usize,

    /// What to do when a producer registers a stream id that is already live.
    #[arg(
        long,
        env = "STREAM_ROAD_ON_COLLISION",
        value_enum,
        default_value_t = CollisionPolicy::Overwrite
    )]
    pub on_collision: CollisionPolicy,

    /// Grace period applied during shutdown.
    #[arg(long, env = "STREAM_ROAD_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub streamer_port: u16,
    pub viewer_port: u16,
    pub gps_input_port: u16,
    pub gps_output_port: u16,
    pub gps_history_capacity: usize,
    pub collision_policy: CollisionPolicy,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn streamer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.streamer_port)
    }

    pub fn viewer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.viewer_port)
    }

    pub fn gps_input_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.gps_input_port)
    }

    pub fn gps_output_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.gps_output_port)
    }

    /// Loopback config with ephemeral ports, for tests and embedding.
    pub fn ephemeral() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            streamer_port: 0,
            viewer_port: 0,
            gps_input_port: 0,
            gps_output_port: 0,
            gps_history_capacity: 1000,
            collision_policy: CollisionPolicy::Overwrite,
            shutdown_grace: Duration::ZERO,
        }
    }
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let host: IpAddr = args
            .host
            .parse()
            .with_context(|| format!("invalid host address: {}", args.host))?;

        if args.gps_history_capacity == 0 {
            bail!("gps history capacity must be greater than zero");
        }

        let ports = [
            ("streamer", args.streamer_port),
            ("viewer", args.viewer_port),
            ("gps input", args.gps_input_port),
            ("gps output", args.gps_output_port),
        ];
        for (i, (name, port)) in ports.iter().enumerate() {
            // Port 0 asks the OS for a fresh port, so repeats are fine.
            if *port == 0 {
                continue;
            }
            if let Some((other, _)) = ports[i + 1..].iter().find(|(_, p)| p == port) {
                bail!("{name} and {other} listeners cannot share port {port}");
            }
        }

        Ok(ServerConfig {
            host,
            streamer_port: args.streamer_port,
            viewer_port: args.viewer_port,
            gps_input_port: args.gps_input_port,
            gps_output_port: args.gps_output_port,
            gps_history_capacity: args.gps_history_capacity,
            collision_policy: args.on_collision,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            host: "0.0.0.0".into(),
            streamer_port: 5000,
            viewer_port: 5001,
            gps_input_port: 5002,
            gps_output_port: 5004,
            gps_history_capacity: 1000,
            on_collision: CollisionPolicy::Overwrite,
            shutdown_grace_secs: 2,
        }
    }

    #[test]
    fn defaults_convert() {
        let config = ServerConfig::try_from(args()).unwrap();
        assert_eq!(config.streamer_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(config.gps_output_addr().port(), 5004);
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn shared_ports_are_rejected() {
        let mut shared = args();
        shared.gps_output_port = shared.viewer_port;
        let err = ServerConfig::try_from(shared).unwrap_err();
        assert!(err.to_string().contains("cannot share port 5001"));
    }

    #[test]
    fn ephemeral_ports_may_repeat() {
        let mut ephemeral = args();
        ephemeral.streamer_port = 0;
        ephemeral.viewer_port = 0;
        assert!(ServerConfig::try_from(ephemeral).is_ok());
    }

    #[test]
    fn zero_capacity_and_bad_host_are_rejected() {
        let mut zero = args();
        zero.gps_history_capacity = 0;
        assert!(ServerConfig::try_from(zero).is_err());

        let mut host = args();
        host.host = "not-an-ip".into();
        assert!(ServerConfig::try_from(host).is_err());
    }
}
