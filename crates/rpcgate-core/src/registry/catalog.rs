//! Built-in registration units.
//!
//! Most backend methods need nothing from the gateway beyond carrying the
//! payload: [`ForwardingService`] registers `"{service}.{method}"` names whose
//! invoker forwards the request verbatim over the connection.
//! [`RestService`] covers the few endpoints the backend only serves over
//! HTTPS; those go through the session's auxiliary HTTP client.

use super::{Invoker, RegistrationUnit, RegistryBuilder};
use crate::bridge::CallContext;
use crate::connection::Session;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Forwards every listed method over the backend connection.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingService {
    pub service: &'static str,
    pub methods: &'static [&'static str],
}

impl ForwardingService {
    pub const fn new(service: &'static str, methods: &'static [&'static str]) -> Self {
        Self { service, methods }
    }
}

struct ForwardInvoker {
    method: String,
}

#[async_trait]
impl Invoker for ForwardInvoker {
    async fn call(
        &self,
        _ctx: CallContext,
        session: Arc<Session>,
        request: String,
    ) -> Result<String> {
        session.connection().call(&self.method, &request).await
    }
}

impl RegistrationUnit for ForwardingService {
    fn name(&self) -> &str {
        self.service
    }

    fn register_into(&self, registry: &mut RegistryBuilder) -> Result<()> {
        for method in self.methods {
            let name = format!("{}.{}", self.service, method);
            registry.register(
                name.clone(),
                Arc::new(ForwardInvoker { method: name }),
            )?;
        }
        Ok(())
    }
}

/// Methods served by POSTing the payload to a route on the backend's HTTPS
/// endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RestService {
    pub service: &'static str,
    /// `(method, route)` pairs; routes are relative to the server address.
    pub routes: &'static [(&'static str, &'static str)],
}

struct RestInvoker {
    route: &'static str,
}

#[async_trait]
impl Invoker for RestInvoker {
    async fn call(
        &self,
        _ctx: CallContext,
        session: Arc<Session>,
        request: String,
    ) -> Result<String> {
        session.http().post_json(self.route, &request).await
    }
}

impl RegistrationUnit for RestService {
    fn name(&self) -> &str {
        self.service
    }

    fn register_into(&self, registry: &mut RegistryBuilder) -> Result<()> {
        for &(method, route) in self.routes {
            registry.register(
                format!("{}.{}", self.service, method),
                Arc::new(RestInvoker { route }),
            )?;
        }
        Ok(())
    }
}

pub const LIGHTNING: ForwardingService = ForwardingService::new(
    "lnrpc.Lightning",
    &[
        "GetInfo",
        "GetRecoveryInfo",
        "WalletBalance",
        "ChannelBalance",
        "GetTransactions",
        "EstimateFee",
        "SendCoins",
        "ListUnspent",
        "NewAddress",
        "SignMessage",
        "VerifyMessage",
        "ConnectPeer",
        "DisconnectPeer",
        "ListPeers",
        "PendingChannels",
        "ListChannels",
        "ClosedChannels",
        "OpenChannelSync",
        "SendPaymentSync",
        "AddInvoice",
        "ListInvoices",
        "LookupInvoice",
        "DecodePayReq",
        "ListPayments",
        "DescribeGraph",
        "GetNodeInfo",
        "GetChanInfo",
        "QueryRoutes",
        "GetNetworkInfo",
        "FeeReport",
        "UpdateChannelPolicy",
        "ForwardingHistory",
    ],
);

pub const STATE: ForwardingService =
    ForwardingService::new("lnrpc.State", &["GetState"]);

pub const AUTOPILOT: ForwardingService = ForwardingService::new(
    "autopilotrpc.Autopilot",
    &["Status", "ModifyStatus", "QueryScores", "SetScores"],
);

pub const CHAIN_NOTIFIER: ForwardingService = ForwardingService::new(
    "chainrpc.ChainNotifier",
    &[
        "RegisterConfirmationsNtfn",
        "RegisterSpendNtfn",
        "RegisterBlockEpochNtfn",
    ],
);

pub const SIGNER: ForwardingService = ForwardingService::new(
    "signrpc.Signer",
    &[
        "SignOutputRaw",
        "ComputeInputScript",
        "SignMessage",
        "VerifyMessage",
        "DeriveSharedKey",
    ],
);

pub const WATCHTOWER: ForwardingService =
    ForwardingService::new("watchtowerrpc.Watchtower", &["GetInfo"]);

pub const WATCHTOWER_CLIENT: ForwardingService = ForwardingService::new(
    "wtclientrpc.WatchtowerClient",
    &[
        "AddTower",
        "RemoveTower",
        "ListTowers",
        "GetTowerInfo",
        "Stats",
        "Policy",
    ],
);

pub const VERSIONER: ForwardingService =
    ForwardingService::new("verrpc.Versioner", &["GetVersion"]);

pub const WALLET_KIT: ForwardingService = ForwardingService::new(
    "walletrpc.WalletKit",
    &[
        "ListUnspent",
        "NextAddr",
        "ListAccounts",
        "EstimateFee",
        "PendingSweeps",
        "BumpFee",
        "ListSweeps",
    ],
);

pub const ROUTER: ForwardingService = ForwardingService::new(
    "routerrpc.Router",
    &[
        "EstimateRouteFee",
        "SendToRouteV2",
        "ResetMissionControl",
        "QueryMissionControl",
        "QueryProbability",
        "BuildRoute",
    ],
);

pub const INVOICES: ForwardingService = ForwardingService::new(
    "invoicesrpc.Invoices",
    &["CancelInvoice", "AddHoldInvoice", "SettleInvoice"],
);

pub const SWAP_CLIENT: ForwardingService = ForwardingService::new(
    "looprpc.SwapClient",
    &[
        "LoopOut",
        "LoopIn",
        "ListSwaps",
        "SwapInfo",
        "LoopOutTerms",
        "LoopOutQuote",
        "GetLoopInTerms",
        "GetLoopInQuote",
        "GetLsatTokens",
        "GetLiquidityParams",
        "SetLiquidityParams",
        "SuggestSwaps",
    ],
);

pub const TRADER: ForwardingService = ForwardingService::new(
    "poolrpc.Trader",
    &[
        "GetInfo",
        "QuoteAccount",
        "InitAccount",
        "ListAccounts",
        "CloseAccount",
        "DepositAccount",
        "WithdrawAccount",
        "SubmitOrder",
        "ListOrders",
        "CancelOrder",
        "AuctionFee",
        "Leases",
        "BatchSnapshot",
    ],
);

pub const SERVER_STATUS: RestService = RestService {
    service: "status.Server",
    routes: &[("GetStatus", "v1/status"), ("GetTerms", "v1/terms")],
};

/// The fixed, ordered list of registration units applied at startup.
pub fn default_registrations() -> Vec<Box<dyn RegistrationUnit>> {
    vec![
        Box::new(LIGHTNING),
        Box::new(STATE),
        Box::new(AUTOPILOT),
        Box::new(CHAIN_NOTIFIER),
        Box::new(INVOICES),
        Box::new(ROUTER),
        Box::new(SIGNER),
        Box::new(VERSIONER),
        Box::new(WALLET_KIT),
        Box::new(WATCHTOWER),
        Box::new(WATCHTOWER_CLIENT),
        Box::new(SWAP_CLIENT),
        Box::new(TRADER),
        Box::new(SERVER_STATUS),
    ]
}
