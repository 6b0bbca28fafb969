//! Per-network chain parameters and script-rule activation heights.

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

/// Heights at which consensus script rules switch on for a network.
#[derive(Clone, Copy, Debug)]
pub struct Deployments {
    pub p2sh_height: u32,
    pub dersig_height: u32,
    pub cltv_height: u32,
    pub csv_height: u32,
    pub segwit_height: u32,
    pub taproot_height: u32,
}

/// Constants needed to reconstruct the network's genesis block.
#[derive(Clone, Copy, Debug)]
pub struct GenesisParams {
    pub version: i32,
    pub time: u32,
    pub nonce: u32,
    pub bits: u32,
    pub reward: i64,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub deployments: Deployments,
    pub pow_limit_bits: u32,
    pub genesis: GenesisParams,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub name: &'static str,
    pub magic: [u8; 4],
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub dns_seeds: &'static [&'static str],
    pub consensus: ConsensusParams,
}

const MAINNET_SEEDS: &[&str] = &[
    "seed.bitcoin.sipa.be",
    "dnsseed.bluematt.me",
    "dnsseed.bitcoin.dashjr.org",
    "seed.bitcoinstats.com",
    "seed.bitcoin.jonasschnelli.ch",
    "seed.btc.petertodd.org",
    "seed.bitcoin.sprovoost.nl",
    "dnsseed.emzy.de",
    "seed.bitcoin.wiz.biz",
];

const TESTNET_SEEDS: &[&str] = &[
    "testnet-seed.bitcoin.jonasschnelli.ch",
    "seed.tbtc.petertodd.org",
    "seed.testnet.bitcoin.sprovoost.nl",
    "testnet-seed.bluematt.me",
];

const SIGNET_SEEDS: &[&str] = &["seed.signet.bitcoin.sprovoost.nl"];

const BLOCK_REWARD: i64 = 50 * 100_000_000;

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            name: "mainnet",
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            p2p_port: 8333,
            rpc_port: 8334,
            dns_seeds: MAINNET_SEEDS,
            consensus: ConsensusParams {
                deployments: Deployments {
                    p2sh_height: 173_805,
                    dersig_height: 363_725,
                    cltv_height: 388_381,
                    csv_height: 419_328,
                    segwit_height: 481_824,
                    taproot_height: 709_632,
                },
                pow_limit_bits: 0x1d00ffff,
                genesis: GenesisParams {
                    version: 1,
                    time: 1_231_006_505,
                    nonce: 2_083_236_893,
                    bits: 0x1d00ffff,
                    reward: BLOCK_REWARD,
                },
            },
        },
        Network::Testnet => ChainParams {
            network,
            name: "testnet",
            magic: [0x0b, 0x11, 0x09, 0x07],
            p2p_port: 18333,
            rpc_port: 18334,
            dns_seeds: TESTNET_SEEDS,
            consensus: ConsensusParams {
                deployments: Deployments {
                    p2sh_height: 395,
                    dersig_height: 330_776,
                    cltv_height: 581_885,
                    csv_height: 770_112,
                    segwit_height: 834_624,
                    taproot_height: 2_011_968,
                },
                pow_limit_bits: 0x1d00ffff,
                genesis: GenesisParams {
                    version: 1,
                    time: 1_296_688_602,
                    nonce: 414_098_458,
                    bits: 0x1d00ffff,
                    reward: BLOCK_REWARD,
                },
            },
        },
        Network::Signet => ChainParams {
            network,
            name: "signet",
            magic: [0x0a, 0x03, 0xcf, 0x40],
            p2p_port: 38333,
            rpc_port: 38334,
            dns_seeds: SIGNET_SEEDS,
            consensus: ConsensusParams {
                deployments: ALWAYS_ACTIVE,
                pow_limit_bits: 0x1e0377ae,
                genesis: GenesisParams {
                    version: 1,
                    time: 1_598_918_400,
                    nonce: 52_613_770,
                    bits: 0x1e0377ae,
                    reward: BLOCK_REWARD,
                },
            },
        },
        Network::Regtest => ChainParams {
            network,
            name: "regtest",
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            p2p_port: 18444,
            rpc_port: 18445,
            dns_seeds: &[],
            consensus: ConsensusParams {
                deployments: ALWAYS_ACTIVE,
                pow_limit_bits: 0x207fffff,
                genesis: GenesisParams {
                    version: 1,
                    time: 1_296_688_602,
                    nonce: 2,
                    bits: 0x207fffff,
                    reward: BLOCK_REWARD,
                },
            },
        },
    }
}

const ALWAYS_ACTIVE: Deployments = Deployments {
    p2sh_height: 0,
    dersig_height: 0,
    cltv_height: 0,
    csv_height: 0,
    segwit_height: 0,
    taproot_height: 0,
};
