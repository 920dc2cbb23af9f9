use tracing::debug;

use crate::error::{Result, StageError};
use crate::stage::{BoxedStage, ChannelWritable, Propagation, Stage, Writable};

/// The unnamed channel. Plain pushes travel on it.
pub const DEFAULT_CHANNEL: &str = "";

/// Index of a destination owned by a [`ChannelSwitch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationId(usize);

/// Configuration for a [`ChannelSwitch`].
#[derive(Debug, Clone, Default)]
pub struct SwitchConfig {
    /// Fail with [`StageError::NoRoute`] when a channel has no route and no
    /// default route exists. When false such input is dropped.
    pub reject_unrouted: bool,
}

#[derive(Debug)]
struct Route {
    destination: DestinationId,
    out_channel: String,
}

/// Routes named channels to owned destination stages.
///
/// A channel may have several routes; input is then fanned out to each of
/// them in the order they were added. Channels without a route go to the
/// default routes.
pub struct ChannelSwitch {
    config: SwitchConfig,
    destinations: Vec<BoxedStage>,
    routes: Vec<(String, Route)>,
    defaults: Vec<Route>,
    // Route index to resume at after a non-blocking push was refused.
    resume_from: usize,
}

impl ChannelSwitch {
    pub fn new(config: SwitchConfig) -> Self {
        Self {
            config,
            destinations: Vec::new(),
            routes: Vec::new(),
            defaults: Vec::new(),
            resume_from: 0,
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Take ownership of a destination stage.
    pub fn add_destination(&mut self, stage: BoxedStage) -> DestinationId {
        self.destinations.push(stage);
        DestinationId(self.destinations.len() - 1)
    }

    pub fn destination(&self, id: DestinationId) -> Option<&(dyn Stage + 'static)> {
        self.destinations.get(id.0).map(|stage| stage.as_ref())
    }

    pub fn destination_mut(&mut self, id: DestinationId) -> Option<&mut (dyn Stage + 'static)> {
        self.destinations.get_mut(id.0).map(|stage| stage.as_mut())
    }

    /// Route `channel` to `out_channel` of `destination`.
    pub fn add_route(&mut self, channel: &str, destination: DestinationId, out_channel: &str) {
        self.routes.push((
            channel.to_owned(),
            Route {
                destination,
                out_channel: out_channel.to_owned(),
            },
        ));
    }

    /// Remove every route from `channel` to `destination`.
    pub fn remove_route(&mut self, channel: &str, destination: DestinationId) {
        self.routes
            .retain(|(name, route)| !(name == channel && route.destination == destination));
    }

    /// Route otherwise unrouted channels to `out_channel` of `destination`.
    pub fn add_default_route(&mut self, destination: DestinationId, out_channel: &str) {
        self.defaults.push(Route {
            destination,
            out_channel: out_channel.to_owned(),
        });
    }
}

// Routes for `channel`, falling back to the defaults when it has none.
fn select<'a>(
    routes: &'a [(String, Route)],
    defaults: &'a [Route],
    channel: &'a str,
) -> impl Iterator<Item = &'a Route> + 'a {
    let named = routes.iter().any(|(name, _)| name == channel);
    let routed = routes
        .iter()
        .filter(move |(name, _)| named && name == channel)
        .map(|(_, route)| route);
    routed.chain(defaults.iter().filter(move |_| !named))
}

fn deliver(
    destinations: &mut [BoxedStage],
    route: &Route,
    input: &[u8],
    end: Option<Propagation>,
    blocking: bool,
) -> Result<usize> {
    let Some(stage) = destinations.get_mut(route.destination.0) else {
        return Ok(0);
    };
    if route.out_channel == DEFAULT_CHANNEL {
        stage.push(input, end, blocking)
    } else {
        stage
            .channel_writable_mut()?
            .channel_push(&route.out_channel, input, end, blocking)
    }
}

impl Default for ChannelSwitch {
    fn default() -> Self {
        Self::new(SwitchConfig::default())
    }
}

impl Writable for ChannelSwitch {
    fn push(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize> {
        self.channel_push(DEFAULT_CHANNEL, input, end, blocking)
    }

    fn isolated_flush(&mut self, hard: bool, blocking: bool) -> Result<bool> {
        for stage in &mut self.destinations {
            if stage.flush(hard, Propagation::Unlimited, blocking)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl ChannelWritable for ChannelSwitch {
    fn channel_push(
        &mut self,
        channel: &str,
        input: &[u8],
        end: Option<Propagation>,
        blocking: bool,
    ) -> Result<usize> {
        let Self {
            config,
            destinations,
            routes,
            defaults,
            resume_from,
        } = self;
        let mut selected = select(routes, defaults, channel).peekable();
        if selected.peek().is_none() {
            if config.reject_unrouted {
                return Err(StageError::NoRoute {
                    channel: channel.to_owned(),
                });
            }
            debug!(channel, len = input.len(), "dropping unrouted channel input");
            return Ok(0);
        }

        let end = end.and_then(Propagation::next);
        for route in selected.skip(*resume_from) {
            match deliver(destinations, route, input, end, blocking) {
                Ok(0) => *resume_from += 1,
                Ok(blocked) => return Ok(blocked),
                Err(err) => {
                    // A failed push is not resumed.
                    *resume_from = 0;
                    return Err(err);
                }
            }
        }
        *resume_from = 0;
        Ok(0)
    }

    fn channel_message_series_end(
        &mut self,
        channel: &str,
        propagation: Propagation,
        blocking: bool,
    ) -> Result<bool> {
        let Some(next) = propagation.next() else {
            return Ok(false);
        };
        for route in select(&self.routes, &self.defaults, channel) {
            let Some(stage) = self.destinations.get_mut(route.destination.0) else {
                continue;
            };
            let blocked = if route.out_channel == DEFAULT_CHANNEL {
                stage.signal_message_series_end(next, blocking)?
            } else {
                stage
                    .channel_writable_mut()?
                    .channel_message_series_end(&route.out_channel, next, blocking)?
            };
            if blocked {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Stage for ChannelSwitch {
    fn name(&self) -> &'static str {
        "ChannelSwitch"
    }

    fn as_channel_writable_mut(&mut self) -> Option<&mut dyn ChannelWritable> {
        Some(self)
    }

    /// A series end reaches every destination.
    fn signal_message_series_end(&mut self, propagation: Propagation, blocking: bool) -> Result<bool> {
        let Some(next) = propagation.next() else {
            return Ok(false);
        };
        for stage in &mut self.destinations {
            if stage.signal_message_series_end(next, blocking)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageQueue;
    use crate::sink::Discard;
    use crate::stage::{MessageReadable, Readable};

    fn switch_with_two_queues() -> (ChannelSwitch, DestinationId, DestinationId) {
        let mut switch = ChannelSwitch::default();
        let a = switch.add_destination(Box::new(MessageQueue::new()));
        let b = switch.add_destination(Box::new(MessageQueue::new()));
        (switch, a, b)
    }

    fn drain(switch: &mut ChannelSwitch, id: DestinationId) -> Vec<u8> {
        let queue = switch
            .destination_mut(id)
            .unwrap()
            .message_readable_mut()
            .unwrap();
        let mut out = vec![0u8; queue.max_retrievable() as usize];
        queue.pull(&mut out).unwrap();
        out
    }

    #[test]
    fn routes_channels_to_destinations() {
        let (mut switch, a, b) = switch_with_two_queues();
        switch.add_route("left", a, DEFAULT_CHANNEL);
        switch.add_route("right", b, DEFAULT_CHANNEL);

        switch.channel_put("left", b"L").unwrap();
        switch.channel_put("right", b"R").unwrap();

        assert_eq!(drain(&mut switch, a), b"L");
        assert_eq!(drain(&mut switch, b), b"R");
    }

    #[test]
    fn multiple_routes_fan_out() {
        let (mut switch, a, b) = switch_with_two_queues();
        switch.add_route("both", a, DEFAULT_CHANNEL);
        switch.add_route("both", b, DEFAULT_CHANNEL);

        switch
            .channel_push("both", b"xy", Some(Propagation::Hops(1)), true)
            .unwrap();

        for id in [a, b] {
            let queue = switch.destination_mut(id).unwrap().message_readable_mut().unwrap();
            assert_eq!(queue.messages(), 1);
        }
        assert_eq!(drain(&mut switch, a), b"xy");
        assert_eq!(drain(&mut switch, b), b"xy");
    }

    #[test]
    fn unrouted_channel_uses_default_route() {
        let (mut switch, a, b) = switch_with_two_queues();
        switch.add_route("named", a, DEFAULT_CHANNEL);
        switch.add_default_route(b, DEFAULT_CHANNEL);

        switch.put(b"plain").unwrap();
        assert_eq!(drain(&mut switch, b), b"plain");
        assert!(drain(&mut switch, a).is_empty());
    }

    #[test]
    fn unrouted_channel_is_rejected_when_configured() {
        let mut switch = ChannelSwitch::new(SwitchConfig {
            reject_unrouted: true,
        });
        let err = switch.channel_put("nowhere", b"x").unwrap_err();
        assert!(matches!(err, StageError::NoRoute { channel } if channel == "nowhere"));
    }

    #[test]
    fn removed_route_stops_delivery() {
        let (mut switch, a, _) = switch_with_two_queues();
        switch.add_route("c", a, DEFAULT_CHANNEL);
        switch.remove_route("c", a);

        switch.channel_put("c", b"lost").unwrap();
        assert!(drain(&mut switch, a).is_empty());
    }

    #[test]
    fn named_out_channel_requires_channel_capability() {
        let (mut switch, a, _) = switch_with_two_queues();
        switch.add_route("c", a, "inner");
        assert!(matches!(
            switch.channel_put("c", b"x"),
            Err(StageError::Unsupported { .. })
        ));

        let sink = switch.add_destination(Box::new(Discard));
        switch.add_route("d", sink, "inner");
        switch.channel_put("d", b"x").unwrap();
    }

    #[test]
    fn failed_fan_out_does_not_skip_later_pushes() {
        let (mut switch, a, b) = switch_with_two_queues();
        switch.add_route("fan", a, DEFAULT_CHANNEL);
        switch.add_route("fan", b, "inner");
        switch.add_route("plain", a, DEFAULT_CHANNEL);

        assert!(switch.channel_put("fan", b"x").is_err());
        switch.channel_put("plain", b"hello").unwrap();

        assert_eq!(drain(&mut switch, a), b"xhello");
        assert!(drain(&mut switch, b).is_empty());
    }

    #[test]
    fn series_end_reaches_every_destination() {
        let (mut switch, a, b) = switch_with_two_queues();
        switch.add_route("a", a, DEFAULT_CHANNEL);
        switch.add_route("b", b, DEFAULT_CHANNEL);
        switch.channel_push("a", b"1", Some(Propagation::Unlimited), true).unwrap();
        switch.channel_push("b", b"2", Some(Propagation::Unlimited), true).unwrap();

        switch
            .signal_message_series_end(Propagation::Unlimited, true)
            .unwrap();

        for id in [a, b] {
            let queue = switch.destination_mut(id).unwrap().message_readable_mut().unwrap();
            assert_eq!(queue.message_series(), 1);
        }
    }
}
